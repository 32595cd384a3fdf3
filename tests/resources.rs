use match_lstm::resources::{LocalResource, ResourceProvider};
use std::path::PathBuf;

#[test]
fn local_resource_resolves_to_its_path() -> anyhow::Result<()> {
    //    Given
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("vocab.txt");
    std::fs::write(&path, "[PAD]\n[UNK]\n")?;

    //    When
    let resource: Box<dyn ResourceProvider + Send> = Box::new(LocalResource::from(path.clone()));

    //    Then
    assert_eq!(resource.get_local_path()?, path);
    Ok(())
}

#[cfg(feature = "remote")]
#[test]
fn cache_directory_follows_environment() {
    use match_lstm::resources::CACHE_DIRECTORY;

    match std::env::var("MATCH_LSTM_CACHE") {
        Ok(value) => assert_eq!(*CACHE_DIRECTORY, PathBuf::from(value)),
        Err(_) => assert!(CACHE_DIRECTORY.ends_with(".match_lstm")),
    }
}
