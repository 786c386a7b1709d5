use crate::config::{FeedlineConfig, PagingConfig};
use crate::database::Database;
use crate::live::LiveRegistry;
use crate::tasks::BackgroundTasks;
use crate::timeline::TimelineItem;
use std::sync::Arc;

/// Shared handles every service is built from. Cheap to clone.
#[derive(Clone)]
pub struct FeedContext {
    pub database: Database,
    pub live: LiveRegistry<TimelineItem>,
    pub tasks: BackgroundTasks,
    pub paging: PagingConfig,
    pub origin: Arc<str>,
}

impl FeedContext {
    pub fn new(database: Database, config: &FeedlineConfig) -> Self {
        Self {
            database,
            live: LiveRegistry::new(config.live),
            tasks: BackgroundTasks::new(config.tasks),
            paging: config.paging,
            origin: Arc::from(config.origin.as_str()),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> FeedContext {
    use crate::config::{LiveConfig, TaskConfig};

    FeedContext {
        database: crate::database::in_memory(),
        live: LiveRegistry::new(LiveConfig::default()),
        tasks: BackgroundTasks::new(TaskConfig::default()),
        paging: PagingConfig::default(),
        origin: Arc::from("http://localhost:8080"),
    }
}
