use std::fs;
use std::sync::Arc;

use modelbench_project::{CollectionStore, StoreOptions, WellFormedXml};
use tempfile::tempdir;

#[test]
fn import_ingests_valid_models_into_same_named_collection() {
    let temp = tempdir().expect("tempdir");
    let source = temp.path().join("regression");
    fs::create_dir_all(source.join("nested")).expect("source dir");
    fs::write(source.join("login.xml"), "<model name=\"login\"/>").expect("write");
    fs::write(source.join("logout.xml"), "<model><state/></model>").expect("write");
    fs::write(source.join("broken.xml"), "<model>").expect("write");
    fs::write(source.join("notes.txt"), "not a model").expect("write");
    fs::write(source.join("nested/deep.xml"), "<model/>").expect("write");

    let mut store = CollectionStore::open(
        temp.path().join("ws"),
        StoreOptions::default(),
        Arc::default(),
    )
    .expect("open workspace");
    let report = store
        .import_folder(&source, &WellFormedXml)
        .expect("import");

    assert_eq!(report.collection, "regression");
    assert_eq!(report.imported, vec!["login.xml", "logout.xml"]);
    assert_eq!(report.rejected, vec![source.join("broken.xml")]);
    assert!(store.collection_exists("regression"));
    assert!(store.root().join("regression/login.xml").is_file());
    assert!(!store.root().join("regression/broken.xml").exists());
    assert!(store.current().is_none());
}

#[test]
fn importing_twice_disambiguates_names() {
    let temp = tempdir().expect("tempdir");
    let source = temp.path().join("smoke");
    fs::create_dir_all(&source).expect("source dir");
    fs::write(source.join("case.xml"), "<model/>").expect("write");

    let mut store = CollectionStore::open(
        temp.path().join("ws"),
        StoreOptions::default(),
        Arc::default(),
    )
    .expect("open workspace");
    store.import_folder(&source, &WellFormedXml).expect("first import");
    let second = store
        .import_folder(&source, &WellFormedXml)
        .expect("second import");

    assert_eq!(second.imported, vec!["case(1).xml"]);
    let names: Vec<&str> = store
        .models_in("smoke")
        .expect("collection")
        .iter()
        .map(|record| record.name())
        .collect();
    assert_eq!(names, vec!["case(1).xml", "case.xml"]);
}
