//! Deck hierarchy operations

mod common;

use apkg_rs::{
    parse_archive, CardPolicy, ExportOptions, MutationError, Package, PackageVersion,
    SubdeckPolicy, DEFAULT_DECK_ID,
};
use common::*;

#[test]
fn test_rename_propagates_to_descendants() {
    let mut col = fixture();
    let parent = col.deck_by_name("Parent").unwrap().id;
    let child = col.deck_by_name("Parent::Child").unwrap().id;
    let grandchild = col.create_deck("Grand", Some(child)).unwrap();

    col.rename_deck(parent, "Parent2").unwrap();

    assert_eq!(col.deck(parent).unwrap().name, "Parent2");
    assert!(col.deck_by_name("Parent2::Child").is_some());
    assert_eq!(col.deck(grandchild).unwrap().name, "Parent2::Child::Grand");
    assert!(col.deck_by_name("Parent::Child").is_none());
    col.check_deck_integrity().unwrap();
}

#[test]
fn test_rename_survives_export() {
    for version in [PackageVersion::Legacy2, PackageVersion::Latest] {
        let mut package = Package::from_bytes(&fixture_package(version)).unwrap();
        let parent = package.collection().deck_by_name("Parent").unwrap().id;
        package.session_mut().rename_deck(parent, "Parent2").unwrap();

        let back = parse_archive(&package.export(ExportOptions::default()).unwrap()).unwrap();
        let child = back.deck_by_name("Parent2::Child").unwrap();
        assert_eq!(child.parent_id, Some(parent));
        assert_eq!(back.card(CLOZE_CARDS[0]).unwrap().deck_id, child.id);
    }
}

#[test]
fn test_create_subdeck_and_tree() {
    let mut col = fixture();
    let other = col.deck_by_name("Other").unwrap().id;
    let sub = col.create_deck("Sub", Some(other)).unwrap();
    assert_eq!(col.deck(sub).unwrap().name, "Other::Sub");
    assert!(col.deck(other).unwrap().children.contains(&sub));

    let node = col.deck_tree().iter().find(|n| n.id == other).unwrap();
    assert_eq!(node.children.len(), 1);
    assert_eq!(node.children[0].full_name, "Other::Sub");

    assert_eq!(col.create_deck("Sub", Some(-5)), Err(MutationError::DeckNotFound(-5)));
    assert!(matches!(
        col.create_deck("Other", None),
        Err(MutationError::DuplicateDeckName(_))
    ));
}

#[test]
fn test_move_deck() {
    let mut col = fixture();
    let other = col.deck_by_name("Other").unwrap().id;
    let parent = col.deck_by_name("Parent").unwrap().id;
    let child = col.deck_by_name("Parent::Child").unwrap().id;

    col.move_deck(child, Some(other)).unwrap();
    assert_eq!(col.deck(child).unwrap().name, "Other::Child");
    assert!(!col.deck(parent).unwrap().children.contains(&child));
    assert!(col.deck(other).unwrap().children.contains(&child));

    col.move_deck(child, None).unwrap();
    assert_eq!(col.deck(child).unwrap().name, "Child");
    assert!(col.deck_tree().iter().any(|n| n.id == child));

    assert_eq!(
        col.move_deck(DEFAULT_DECK_ID, Some(other)),
        Err(MutationError::DefaultDeckProtected)
    );
    col.move_deck(other, None).unwrap();
    let sub = col.create_deck("Sub", Some(other)).unwrap();
    assert_eq!(
        col.move_deck(other, Some(sub)),
        Err(MutationError::CyclicMove { deck: other, target: sub })
    );
    col.check_deck_integrity().unwrap();
}

#[test]
fn test_delete_moving_cards_and_promoting() {
    let mut col = fixture();
    let parent = col.deck_by_name("Parent").unwrap().id;
    let child = col.deck_by_name("Parent::Child").unwrap().id;
    let models = col.models().len();

    let outcome = col
        .delete_deck(parent, CardPolicy::MoveToDefault, SubdeckPolicy::Promote)
        .unwrap();
    assert_eq!(outcome.removed_decks, vec![parent]);
    assert_eq!(outcome.moved_cards, vec![REVIEWED_CARD]);
    assert_eq!(col.card(REVIEWED_CARD).unwrap().deck_id, DEFAULT_DECK_ID);
    assert_eq!(col.deck(child).unwrap().name, "Child");
    assert_eq!(col.deck(child).unwrap().parent_id, None);
    assert_eq!(col.models().len(), models);
    col.check_deck_integrity().unwrap();
}

#[test]
fn test_delete_recursively() {
    let mut col = fixture();
    let parent = col.deck_by_name("Parent").unwrap().id;
    let child = col.deck_by_name("Parent::Child").unwrap().id;

    let outcome = col
        .delete_deck(parent, CardPolicy::Delete, SubdeckPolicy::Delete)
        .unwrap();
    assert!(outcome.removed_decks.contains(&child));
    assert!(col.deck(child).is_none());
    assert!(col.card(REVIEWED_CARD).is_none());
    assert!(col.card(CLOZE_CARDS[0]).is_none());
    assert!(col.model(CLOZE).is_some());
    assert_eq!(
        col.delete_deck(DEFAULT_DECK_ID, CardPolicy::Delete, SubdeckPolicy::Delete),
        Err(MutationError::DefaultDeckProtected)
    );
}

#[test]
fn test_card_counts() {
    let col = fixture();
    let parent = col.deck_by_name("Parent").unwrap().id;
    assert_eq!(col.card_count(parent, false), 1);
    assert_eq!(col.card_count(parent, true), 3);
    assert_eq!(col.card_count(DEFAULT_DECK_ID, false), 1);
    assert_eq!(col.total_card_count(), 6);
    assert_eq!(col.card_counts().values().sum::<usize>(), 6);
}
