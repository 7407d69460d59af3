pub mod client;
pub mod coordinator;
pub mod reconcile;
pub mod render;

pub use client::{FetchError, RemoteLogSource, SentinelClient};
pub use coordinator::{FeedCoordinator, FeedSettings, FeedSnapshot, PollingHandle};
pub use reconcile::{merge_record, reconcile};
pub use render::{
    relative_age, render_grooming, render_record, render_refined_issue, render_task_order,
    FeedPrinter,
};
