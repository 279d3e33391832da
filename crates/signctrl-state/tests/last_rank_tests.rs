use signctrl_state::{load_last_rank, save_last_rank, StateError, LAST_RANK_FILE};

#[test]
fn test_missing_file_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(load_last_rank(dir.path()).unwrap(), None);
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    save_last_rank(dir.path(), 2).unwrap();
    assert_eq!(load_last_rank(dir.path()).unwrap(), Some(2));

    // Overwrite keeps only the newest rank
    save_last_rank(dir.path(), 1).unwrap();
    assert_eq!(load_last_rank(dir.path()).unwrap(), Some(1));
}

#[test]
fn test_rank_zero_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        save_last_rank(dir.path(), 0),
        Err(StateError::InvalidRank(0))
    ));

    std::fs::write(dir.path().join(LAST_RANK_FILE), r#"{"last_rank":0}"#).unwrap();
    assert!(load_last_rank(dir.path()).is_err());
}

#[test]
fn test_garbage_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(LAST_RANK_FILE), "not json").unwrap();
    assert!(matches!(load_last_rank(dir.path()), Err(StateError::Json(_))));
}
