use super::CardId;

/// One review of a card
///
/// Review logs are append-only; the collection copies them wholesale and
/// never edits one in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewLogEntry {
    /// Review time in epoch milliseconds
    pub id: i64,
    pub card_id: CardId,
    pub usn: i32,
    /// Answer button (1-4), 0 for manual rescheduling
    pub ease: i64,
    pub interval: i64,
    pub last_interval: i64,
    pub ease_factor: i64,
    /// Milliseconds spent answering
    pub time_ms: i64,
    pub review_kind: i64,
}

impl ReviewLogEntry {
    /// Copy of this entry attached to another card
    pub fn rekeyed(&self, id: i64, card_id: CardId) -> Self {
        ReviewLogEntry {
            id,
            card_id,
            usn: -1,
            ..self.clone()
        }
    }
}
