pub mod settings;
pub mod stages_loader;

pub use settings::{
    AnalyticsSettings, CacheSettings, ClientSettings, ResourceSettings, Settings,
};
pub use stages_loader::{StageCatalogue, StageDefinition};
