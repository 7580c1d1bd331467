//! Shared fixtures for the integration tests

#![allow(dead_code)]

use apkg_rs::core::ids::IdSource;
use apkg_rs::{
    export_collection, parse_archive, Card, CardQueue, CardType, Collection, ExportOptions,
    MediaFile, Model, Note, PackageVersion, ReviewLogEntry, DEFAULT_DECK_ID,
};

pub const BASIC: i64 = 100;
pub const CLOZE: i64 = 101;
pub const REVERSED: i64 = 102;

pub const BASIC_NOTE: i64 = 10;
pub const CLOZE_NOTE: i64 = 11;
pub const REVERSED_NOTE: i64 = 12;
pub const DEFAULT_NOTE: i64 = 13;

/// Reviewed basic card: interval 30, ease 2650, 15 reps
pub const REVIEWED_CARD: i64 = 20;
pub const CLOZE_CARDS: [i64; 2] = [21, 22];
pub const REVERSED_CARDS: [i64; 2] = [23, 24];
pub const DEFAULT_CARD: i64 = 25;

pub const MITOCHONDRIA: &str = "The {{c1::mitochondria}} is the {{c2::powerhouse}} of the cell.";

/// A small collection touching every entity kind
///
/// Decks: `Default`, `Parent`, `Parent::Child`, `Other`.
pub fn fixture() -> Collection {
    let mut col = Collection::with_id_source(IdSource::seeded(1_000_000));
    col.add_model(Model::basic(BASIC)).unwrap();
    col.add_model(Model::cloze(CLOZE)).unwrap();
    col.add_model(Model::basic_and_reversed(REVERSED)).unwrap();

    let child = col.create_deck("Parent::Child", None).unwrap();
    let parent = col.deck_by_name("Parent").unwrap().id;
    let other = col.create_deck("Other", None).unwrap();

    let mut note = Note::new(
        BASIC_NOTE,
        "guid-basic",
        BASIC,
        vec!["What is 2+2?".into(), "4".into()],
    );
    note.tags = vec!["math".into(), "easy".into()];
    col.add_note(note).unwrap();
    let mut card = Card::new(REVIEWED_CARD, BASIC_NOTE, parent, 0);
    card.scheduling.card_type = CardType::Review;
    card.scheduling.queue = CardQueue::Review;
    card.scheduling.due = 120;
    card.scheduling.interval = 30;
    card.scheduling.ease_factor = 2650;
    card.scheduling.reps = 15;
    card.scheduling.lapses = 2;
    card.scheduling.flags = 3;
    col.add_card(card).unwrap();
    for (i, (ivl, last)) in [(12, 4), (30, 12)].into_iter().enumerate() {
        col.push_revlog(ReviewLogEntry {
            id: 1_600_000_000_000 + i as i64,
            card_id: REVIEWED_CARD,
            usn: 0,
            ease: 3,
            interval: ivl,
            last_interval: last,
            ease_factor: 2650,
            time_ms: 4_200,
            review_kind: 1,
        });
    }

    col.add_note(Note::new(
        CLOZE_NOTE,
        "guid-cloze",
        CLOZE,
        vec![MITOCHONDRIA.into(), "Biology".into()],
    ))
    .unwrap();
    for (ord, id) in CLOZE_CARDS.into_iter().enumerate() {
        let mut card = Card::new(id, CLOZE_NOTE, child, ord as u32);
        card.scheduling.due = 1 + ord as i64;
        col.add_card(card).unwrap();
    }

    col.add_note(Note::new(
        REVERSED_NOTE,
        "guid-reversed",
        REVERSED,
        vec!["<img src=\"a.png\">".into(), "chat [sound:b.mp3]".into()],
    ))
    .unwrap();
    for (ord, id) in REVERSED_CARDS.into_iter().enumerate() {
        let mut card = Card::new(id, REVERSED_NOTE, other, ord as u32);
        card.scheduling.due = 3 + ord as i64;
        col.add_card(card).unwrap();
    }

    col.add_note(Note::new(
        DEFAULT_NOTE,
        "guid-default",
        BASIC,
        vec!["Capital of France".into(), "Paris".into()],
    ))
    .unwrap();
    let mut card = Card::new(DEFAULT_CARD, DEFAULT_NOTE, DEFAULT_DECK_ID, 0);
    card.scheduling.due = 5;
    col.add_card(card).unwrap();

    col.add_media(MediaFile::new("a.png", b"\x89PNG fake".to_vec())).unwrap();
    col.add_media(MediaFile::new("b.mp3", b"ID3 fake".to_vec())).unwrap();
    col.add_media(MediaFile::new("unused.jpg", b"\xff\xd8 fake".to_vec())).unwrap();
    col
}

/// The fixture written as a package of `version`
pub fn fixture_package(version: PackageVersion) -> Vec<u8> {
    apkg_rs::export_with(
        &fixture(),
        &ExportOptions::default().version(version),
        &apkg_rs::EngineConfig::default(),
    )
    .unwrap()
}

/// The fixture after one trip through a package of `version`
pub fn imported(version: PackageVersion) -> Collection {
    parse_archive(&fixture_package(version)).unwrap()
}

/// Export unchanged and parse again
pub fn cycle(col: &Collection) -> Collection {
    parse_archive(&export_collection(col, None).unwrap()).unwrap()
}

/// Field-for-field comparison of everything a round trip must keep
pub fn assert_same_content(a: &Collection, b: &Collection) {
    assert_eq!(a.notes(), b.notes());
    assert_eq!(a.cards(), b.cards());
    assert_eq!(a.models(), b.models());
    assert_eq!(a.decks(), b.decks());
    assert_eq!(a.deck_tree(), b.deck_tree());
    assert_eq!(a.deck_options, b.deck_options);
    assert_eq!(
        a.revlog_entries().collect::<Vec<_>>(),
        b.revlog_entries().collect::<Vec<_>>()
    );
    assert_eq!(a.media().collect::<Vec<_>>(), b.media().collect::<Vec<_>>());
    assert_eq!(a.graves, b.graves);
}
