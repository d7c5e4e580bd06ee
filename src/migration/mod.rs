// ABOUTME: Data migration engines driven by the replayed catalogs
// ABOUTME: Delete-before-transfer, row transfer, comparison and large-object translation

pub mod classify;
pub mod compare;
pub mod delete;
pub mod large_object;
pub mod transfer;

pub use classify::{DuplicateClassifier, DuplicateDetection, MessageClassifier, SqlStateClassifier};
pub use compare::{CompareEngine, CompareReport, Mismatch};
pub use delete::{delete_target_data, DeleteReport};
pub use large_object::{Direction, LargeObjectRules, TranslationRule};
pub use transfer::{CommitMode, TableTransfer, TransferEngine, TransferReport};
