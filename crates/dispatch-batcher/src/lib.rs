pub mod batcher;
pub mod error;

pub use batcher::{Batcher, DEFAULT_BATCH_SIZE};
pub use error::{BatcherError, Result};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dispatch_core::types::{AssistResponse, Creator, DialogId, TranscriptEntry};
    use dispatch_persistence::{sqlite::SqlitePersistence, PersistenceApi};

    use super::*;

    fn entry(text: &str) -> TranscriptEntry {
        TranscriptEntry::new(Creator::User, AssistResponse::text(text))
    }

    #[tokio::test]
    async fn save_below_threshold_does_not_flush() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let batcher = Batcher::new(persistence.clone(), 5);
        let dialog_id = DialogId(1);

        batcher.save(dialog_id, entry("hi")).await;
        assert_eq!(batcher.pending_len(dialog_id), 1);
        assert!(persistence.read_dialog(dialog_id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_at_threshold_flushes_automatically() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let batcher = Batcher::new(persistence.clone(), 2);
        let dialog_id = DialogId(1);

        batcher.save(dialog_id, entry("one")).await;
        batcher.save(dialog_id, entry("two")).await;

        assert_eq!(batcher.pending_len(dialog_id), 0);
        assert_eq!(persistence.read_dialog(dialog_id, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn flush_all_drains_every_dialog() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let batcher = Batcher::new(persistence.clone(), 100);

        batcher.save(DialogId(1), entry("a")).await;
        batcher.save(DialogId(2), entry("b")).await;

        batcher.flush_all().await;

        assert_eq!(batcher.pending_len(DialogId(1)), 0);
        assert_eq!(batcher.pending_len(DialogId(2)), 0);
        assert_eq!(persistence.read_dialog(DialogId(1), 10).unwrap().len(), 1);
        assert_eq!(persistence.read_dialog(DialogId(2), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flush_dialog_on_empty_queue_is_a_no_op() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let batcher = Batcher::new(persistence.clone(), 10);
        batcher.flush_dialog(DialogId(42)).await;
        assert!(persistence.read_dialog(DialogId(42), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn preserves_insertion_order_within_a_dialog() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let batcher = Batcher::new(persistence.clone(), 10);
        let dialog_id = DialogId(7);

        for i in 0..5 {
            batcher.save(dialog_id, entry(&format!("msg-{i}"))).await;
        }
        batcher.flush_all().await;

        let rows = persistence.read_dialog(dialog_id, 10).unwrap();
        assert_eq!(rows.len(), 5);
        let texts: Vec<String> = rows
            .iter()
            .map(|r| serde_json::from_str::<TranscriptEntry>(r).unwrap().message.message)
            .collect();
        assert_eq!(texts, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }
}
