//! Provider adapters for the generation engine.
//!
//! Each adapter speaks one third-party wire protocol and implements
//! [`ProviderAdapter`]: submit a job, poll its status, and parse a pushed
//! completion notification. Adapters never touch the job store; every
//! state change happens in the engine.

pub mod adapter;
pub mod dalle;
mod http;
pub mod luma;
pub mod midjourney;
mod params;
mod relay;
pub mod settings;
pub mod stable_diffusion;
pub mod suno;

use std::sync::Arc;

use genforge_core::provider::ProviderKind;

pub use adapter::{Notification, ProviderAdapter, ProviderError, RawNotification, RemoteStatus};
pub use settings::ProviderSettings;

/// Header carrying the hex HMAC-SHA256 of the notification body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Build the adapter for `kind` from its settings.
pub fn build_adapter(
    kind: ProviderKind,
    settings: ProviderSettings,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    let adapter: Arc<dyn ProviderAdapter> = match kind {
        ProviderKind::ImageA => Arc::new(dalle::DalleAdapter::new(settings)?),
        ProviderKind::ImageB => Arc::new(midjourney::MidjourneyAdapter::new(settings)?),
        ProviderKind::ImageC => Arc::new(stable_diffusion::StableDiffusionAdapter::new(settings)?),
        ProviderKind::Music => Arc::new(suno::SunoAdapter::new(settings)?),
        ProviderKind::Video => Arc::new(luma::LumaAdapter::new(settings)?),
    };
    Ok(adapter)
}
