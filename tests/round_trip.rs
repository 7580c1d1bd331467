//! Package round trip tests
//!
//! Parse and export must be inverse operations for everything the model
//! carries, in both schema generations.

mod common;

use apkg_rs::{
    export_collection, parse_archive, CardKind, CardOrigin, CardQueue, ExportOptions, Package,
    PackageVersion, DEFAULT_DECK_ID,
};
use common::*;

const VERSIONS: [PackageVersion; 3] = [
    PackageVersion::Legacy1,
    PackageVersion::Legacy2,
    PackageVersion::Latest,
];

#[test]
fn test_basic_note_scenario() {
    for version in VERSIONS {
        let col = imported(version);
        let note = col.note(BASIC_NOTE).unwrap();
        assert_eq!(note.fields, vec!["What is 2+2?", "4"]);
        let card = col.card(REVIEWED_CARD).unwrap();
        assert_eq!(card.note_id, BASIC_NOTE);
        assert_eq!(card.kind(), CardKind::Basic);
        assert_eq!(card.origin, CardOrigin::Imported);
        assert_eq!(col.source_version, Some(version));
    }
}

#[test]
fn test_round_trip_keeps_everything() {
    let original = fixture();
    for version in VERSIONS {
        let col = imported(version);

        for (id, note) in original.notes() {
            let back = col.note(*id).unwrap();
            assert_eq!(back.fields, note.fields);
            assert_eq!(back.tags, note.tags);
            assert_eq!(back.guid, note.guid);
            assert_eq!(back.model_id, note.model_id);
        }
        for (id, card) in original.cards() {
            let back = col.card(*id).unwrap();
            assert_eq!(back.scheduling, card.scheduling, "card {} in {:?}", id, version);
            assert_eq!(back.deck_id, card.deck_id);
            assert_eq!(back.ordinal, card.ordinal);
            assert_eq!(back.kind(), card.kind());
        }
        assert_eq!(
            col.revlog(REVIEWED_CARD),
            original.revlog(REVIEWED_CARD),
            "{:?}",
            version
        );

        let names: Vec<&str> = col.decks().values().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"Parent::Child"));
        assert!(names.contains(&"Other"));
        let child = col.deck_by_name("Parent::Child").unwrap();
        assert_eq!(child.parent_id, Some(col.deck_by_name("Parent").unwrap().id));

        let media: Vec<(&str, &[u8])> = col
            .media()
            .map(|m| (m.filename.as_str(), m.data.as_slice()))
            .collect();
        let expected: Vec<(&str, &[u8])> = original
            .media()
            .map(|m| (m.filename.as_str(), m.data.as_slice()))
            .collect();
        assert_eq!(media, expected);
    }
}

#[test]
fn test_three_cycles_are_stable() {
    for version in VERSIONS {
        let first = imported(version);
        let mut col = cycle(&first);
        for _ in 0..2 {
            col = cycle(&col);
        }
        assert_same_content(&first, &col);
        assert_eq!(col.source_version, Some(version));
    }
}

#[test]
fn test_unchanged_export_is_byte_identical() {
    for version in VERSIONS {
        let bytes = fixture_package(version);
        let col = parse_archive(&bytes).unwrap();
        let once = export_collection(&col, None).unwrap();
        let twice = export_collection(&col, None).unwrap();
        assert_eq!(once, twice);
    }
}

#[test]
fn test_ids_survive_round_trip() {
    let mut package = Package::from_bytes(&fixture_package(PackageVersion::Legacy2)).unwrap();
    let deck_ids: Vec<i64> = package.collection().decks().keys().copied().collect();
    let model_ids: Vec<i64> = package.collection().models().keys().copied().collect();

    let generated = package
        .session_mut()
        .generate_card(apkg_rs::NewCard::new(
            BASIC,
            DEFAULT_DECK_ID,
            vec!["New".into(), "Card".into()],
        ))
        .unwrap();
    let generated_note = package.collection().card(generated).unwrap().note_id;

    for version in VERSIONS {
        let bytes = package.export(ExportOptions::default().version(version)).unwrap();
        let back = parse_archive(&bytes).unwrap();
        assert_eq!(back.decks().keys().copied().collect::<Vec<_>>(), deck_ids);
        assert_eq!(back.models().keys().copied().collect::<Vec<_>>(), model_ids);
        for id in package.collection().cards().keys() {
            assert!(back.card(*id).is_some(), "card {} lost in {:?}", id, version);
        }
        assert_eq!(back.card(generated).unwrap().note_id, generated_note);
        assert_eq!(back.card(generated).unwrap().scheduling.queue, CardQueue::New);
    }
}

#[test]
fn test_cross_generation_conversion() {
    let legacy = imported(PackageVersion::Legacy2);
    let modern_bytes = export_collection_as(&legacy, PackageVersion::Latest);
    let modern = parse_archive(&modern_bytes).unwrap();
    assert_eq!(modern.source_version, Some(PackageVersion::Latest));
    assert_eq!(modern.notes(), legacy.notes());
    assert_eq!(modern.cards(), legacy.cards());
    assert_eq!(modern.deck_tree(), legacy.deck_tree());

    let back = parse_archive(&export_collection_as(&modern, PackageVersion::Legacy2)).unwrap();
    assert_eq!(back.notes(), legacy.notes());
    assert_eq!(back.cards(), legacy.cards());
    for (id, options) in &legacy.deck_options {
        let converted = &back.deck_options[id];
        assert_eq!(converted.name, options.name);
    }
}

#[test]
fn test_edits_travel() {
    let mut package = Package::from_bytes(&fixture_package(PackageVersion::Latest)).unwrap();
    package
        .session_mut()
        .edit_fields(BASIC_NOTE, vec!["What is 3+3?".into(), "6".into()])
        .unwrap();
    let back = parse_archive(&package.export(ExportOptions::default()).unwrap()).unwrap();
    assert_eq!(back.note(BASIC_NOTE).unwrap().fields, vec!["What is 3+3?", "6"]);
    assert_eq!(back.note(BASIC_NOTE).unwrap().sort_field(0), "What is 3+3?");
}

fn export_collection_as(col: &apkg_rs::Collection, version: PackageVersion) -> Vec<u8> {
    apkg_rs::export_with(
        col,
        &ExportOptions::default().version(version),
        &apkg_rs::EngineConfig::default(),
    )
    .unwrap()
}
