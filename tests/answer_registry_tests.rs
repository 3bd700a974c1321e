use massgen::types::{NoveltyRequirement, SnapshotId};
use massgen::answer_registry::{AnswerRegistry, RejectionReason, SubmissionOutcome};

#[test]
fn two_agents_interleave_without_label_collisions() {
    let mut reg = AnswerRegistry::new(None, NoveltyRequirement::Lenient, 0);
    let a1 = reg.submit("alice", "the capital of France is Paris", SnapshotId::empty());
    let b1 = reg.submit("bob", "quicksort has average case O(n log n)", SnapshotId::empty());
    let a2 = reg.submit("alice", "actually let me add some context about French history", SnapshotId::empty());

    assert!(matches!(a1, SubmissionOutcome::Accepted(ref l) if l == "alice.1"));
    assert!(matches!(b1, SubmissionOutcome::Accepted(ref l) if l == "bob.1"));
    assert!(matches!(a2, SubmissionOutcome::Accepted(ref l) if l == "alice.2"));
    assert_eq!(reg.answer_count("alice"), 2);
    assert_eq!(reg.answer_count("bob"), 1);
}

#[test]
fn balanced_novelty_rejects_cross_agent_duplicate() {
    let mut reg = AnswerRegistry::new(None, NoveltyRequirement::Balanced, 0);
    reg.submit("alice", "Use a hash map for O(1) average lookups.", SnapshotId::empty());
    let rejected = reg.submit("bob", "Use a hash map for O(1) average lookup time.", SnapshotId::empty());
    assert!(matches!(
        rejected,
        SubmissionOutcome::Rejected(RejectionReason::InsufficientNovelty { .. })
    ));
}

#[test]
fn get_by_label_finds_the_right_answer() {
    let mut reg = AnswerRegistry::new(None, NoveltyRequirement::Lenient, 0);
    reg.submit("alice", "first candidate answer text", SnapshotId::empty());
    reg.submit("bob", "second candidate answer about birds", SnapshotId::empty());
    let found = reg.get("bob.1").expect("bob.1 exists");
    assert_eq!(found.agent_id, "bob");
    assert!(!reg.is_empty());
}
