//! Cards and their scheduling state

use super::{CardId, DeckId, NoteId};
use crate::model::ModelKind;
use serde::{Deserialize, Serialize};

/// Where a card came from
///
/// Dispatch on the tag through [`CardOrigin::capabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardOrigin {
    /// Read from the source package
    Imported,
    /// Created in this session
    Generated,
}

/// What the lifecycle layer may do with a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_hard_delete: bool,
    pub can_restore: bool,
}

impl CardOrigin {
    pub const fn capabilities(self) -> Capabilities {
        match self {
            CardOrigin::Imported => Capabilities {
                can_hard_delete: false,
                can_restore: true,
            },
            CardOrigin::Generated => Capabilities {
                can_hard_delete: true,
                can_restore: false,
            },
        }
    }
}

/// Derived card tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardKind {
    /// Standard note type, first template
    Basic,
    /// Standard note type, any later template
    Reversed,
    Cloze,
}

impl CardKind {
    pub fn derive(model_kind: ModelKind, ordinal: u32) -> Self {
        match (model_kind, ordinal) {
            (ModelKind::Cloze, _) => CardKind::Cloze,
            (ModelKind::Standard, 0) => CardKind::Basic,
            (ModelKind::Standard, _) => CardKind::Reversed,
        }
    }
}

/// Card type column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum CardType {
    New = 0,
    Learning = 1,
    Review = 2,
    Relearning = 3,
}

impl CardType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(CardType::New),
            1 => Some(CardType::Learning),
            2 => Some(CardType::Review),
            3 => Some(CardType::Relearning),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Card queue column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum CardQueue {
    UserBuried = -3,
    SchedBuried = -2,
    Suspended = -1,
    New = 0,
    Learning = 1,
    Review = 2,
    DayLearn = 3,
    Preview = 4,
}

impl CardQueue {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            -3 => Some(CardQueue::UserBuried),
            -2 => Some(CardQueue::SchedBuried),
            -1 => Some(CardQueue::Suspended),
            0 => Some(CardQueue::New),
            1 => Some(CardQueue::Learning),
            2 => Some(CardQueue::Review),
            3 => Some(CardQueue::DayLearn),
            4 => Some(CardQueue::Preview),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Ease factor of a card that has never been reviewed, in permille
pub const DEFAULT_EASE_FACTOR: i64 = 2500;

/// The scheduling tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduling {
    pub card_type: CardType,
    pub queue: CardQueue,
    /// New position, day number or epoch seconds depending on the queue
    pub due: i64,
    pub interval: i64,
    pub ease_factor: i64,
    pub reps: i64,
    pub lapses: i64,
    pub left: i64,
    pub original_due: i64,
    pub original_deck_id: DeckId,
    /// Color flag in the low bits
    pub flags: i64,
}

impl Scheduling {
    /// State of a freshly created card
    pub fn fresh(due: i64) -> Self {
        Scheduling {
            card_type: CardType::New,
            queue: CardQueue::New,
            due,
            interval: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            reps: 0,
            lapses: 0,
            left: 0,
            original_due: 0,
            original_deck_id: 0,
            flags: 0,
        }
    }
}

impl Default for Scheduling {
    fn default() -> Self {
        Self::fresh(0)
    }
}

/// A card
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: CardId,
    pub note_id: NoteId,
    pub deck_id: DeckId,
    pub ordinal: u32,
    pub(crate) kind: CardKind,
    pub scheduling: Scheduling,
    pub mtime: i64,
    pub usn: i32,
    /// Opaque `data` column
    pub data: String,
    pub origin: CardOrigin,
    pub is_deleted: bool,
}

impl Card {
    /// A new, generated card; the kind is fixed when it joins a collection
    pub fn new(id: CardId, note_id: NoteId, deck_id: DeckId, ordinal: u32) -> Self {
        Card {
            id,
            note_id,
            deck_id,
            ordinal,
            kind: CardKind::Basic,
            scheduling: Scheduling::default(),
            mtime: super::now_secs(),
            usn: -1,
            data: String::new(),
            origin: CardOrigin::Generated,
            is_deleted: false,
        }
    }

    pub fn kind(&self) -> CardKind {
        self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.origin.capabilities()
    }

    /// The 1-based cloze number a cloze card shows
    pub fn cloze_ordinal(&self) -> u32 {
        self.ordinal + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_by_origin() {
        let imported = CardOrigin::Imported.capabilities();
        assert!(!imported.can_hard_delete);
        assert!(imported.can_restore);

        let generated = CardOrigin::Generated.capabilities();
        assert!(generated.can_hard_delete);
        assert!(!generated.can_restore);
    }

    #[test]
    fn test_queue_conversion() {
        for value in -3..=4 {
            let queue = CardQueue::from_i64(value).unwrap();
            assert_eq!(queue.as_i64(), value);
        }
        assert_eq!(CardQueue::from_i64(5), None);
        assert_eq!(CardQueue::from_i64(-4), None);
    }

    #[test]
    fn test_type_conversion() {
        for value in 0..=3 {
            assert_eq!(CardType::from_i64(value).unwrap().as_i64(), value);
        }
        assert_eq!(CardType::from_i64(4), None);
    }

    #[test]
    fn test_kind_derivation() {
        assert_eq!(CardKind::derive(ModelKind::Standard, 0), CardKind::Basic);
        assert_eq!(CardKind::derive(ModelKind::Standard, 1), CardKind::Reversed);
        assert_eq!(CardKind::derive(ModelKind::Cloze, 3), CardKind::Cloze);
    }

    #[test]
    fn test_fresh_scheduling() {
        let sched = Scheduling::fresh(7);
        assert_eq!(sched.queue, CardQueue::New);
        assert_eq!(sched.card_type, CardType::New);
        assert_eq!(sched.ease_factor, DEFAULT_EASE_FACTOR);
        assert_eq!(sched.due, 7);
        assert_eq!(sched.reps, 0);
    }
}
