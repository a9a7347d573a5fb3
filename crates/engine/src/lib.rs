pub mod bus;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod pending;
pub mod resolver;
pub mod state;

pub use bus::{ChangeCallback, CommitOutcome, PendingCommit, Subscription, UnifiedDataContext};
pub use clipboard::{
    ClipboardMetadata, ClipboardRead, ClipboardService, MemoryClipboard, SystemClipboard,
};
pub use config::EngineConfig;
pub use error::{EngineError, TreeError};
pub use pending::{PendingOperation, PendingSnapshot, PendingStatus};
pub use resolver::{
    merge_slot, InheritanceTree, InheritanceTreeResolver, MergeMode, MergeOptions, SlotQuery,
    TreeCache, TreeNode, TreeStatus,
};
