use massgen::workspace_manager::WorkspaceManager;
use std::fs;

#[test]
fn snapshot_ids_differ_after_live_content_changes() {
    let tmp = tempfile::tempdir().unwrap();
    let mut mgr = WorkspaceManager::new(tmp.path()).unwrap();
    let live = mgr.live_dir("alice").unwrap();
    fs::write(live.join("answer.md"), "first draft").unwrap();
    let id1 = mgr.snapshot("alice").unwrap();

    fs::write(live.join("answer.md"), "revised draft").unwrap();
    let id2 = mgr.snapshot("alice").unwrap();

    assert_ne!(id1, id2);
}

#[test]
fn peer_view_reflects_the_latest_snapshot_not_a_stale_copy() {
    let tmp = tempfile::tempdir().unwrap();
    let mut mgr = WorkspaceManager::new(tmp.path()).unwrap();
    let live = mgr.live_dir("alice").unwrap();
    fs::write(live.join("notes.txt"), "v1").unwrap();
    mgr.snapshot("alice").unwrap();
    mgr.peer_view("bob", "alice").unwrap();

    fs::write(live.join("notes.txt"), "v2").unwrap();
    mgr.snapshot("alice").unwrap();
    let view = mgr.peer_view("bob", "alice").unwrap().expect("view exists");

    assert_eq!(fs::read_to_string(view.join("notes.txt")).unwrap(), "v2");
}

#[test]
fn peer_view_of_an_agent_with_no_snapshot_is_none() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = WorkspaceManager::new(tmp.path()).unwrap();
    assert!(mgr.peer_view("bob", "alice").unwrap().is_none());
}

#[test]
fn final_workspace_path_points_at_the_promoted_agent() {
    let tmp = tempfile::tempdir().unwrap();
    let mut mgr = WorkspaceManager::new(tmp.path()).unwrap();
    let live = mgr.live_dir("alice").unwrap();
    fs::write(live.join("final.md"), "the answer").unwrap();
    mgr.snapshot("alice").unwrap();
    mgr.promote_winner("alice");

    let path = mgr.final_workspace_path().expect("a final workspace was promoted");
    assert!(path.join("final.md").exists());
}
