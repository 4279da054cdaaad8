//! Dashboard HTML
//!
//! The template is registered under a `.html` name, so Tera escapes every
//! interpolated value.

use estap_core::PgSettings;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tera::{Context, Tera};

use crate::db::TableRow;

const DASHBOARD: &str = "dashboard.html";

#[derive(Debug, Snafu)]
pub enum RenderError {
    #[snafu(display("Failed to load template {name}: {source}"))]
    Load { name: String, source: tera::Error },

    #[snafu(display("Failed to render {name}: {source}"))]
    Render { name: String, source: tera::Error },
}

/// Everything the dashboard shows. Unset connection fields render empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dashboard {
    pub host: String,
    pub port: String,
    pub user: String,
    pub database: String,
    pub server_version: String,
    pub tables: Vec<TableRow>,
    pub include_system: bool,
    pub requests_served: u64,
}

impl Dashboard {
    /// Connection fields from `settings`; never the secret
    pub fn for_settings(settings: &PgSettings) -> Self {
        Self {
            host: settings.host.clone().unwrap_or_default(),
            port: settings.port.map(|p| p.to_string()).unwrap_or_default(),
            user: settings.user.clone().unwrap_or_default(),
            database: settings.database.clone().unwrap_or_default(),
            ..Self::default()
        }
    }
}

pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_template(DASHBOARD, include_str!("../templates/dashboard.html"))
            .context(LoadSnafu { name: DASHBOARD })?;
        Ok(Self { tera })
    }

    pub fn dashboard(&self, view: &Dashboard) -> Result<String, RenderError> {
        let context = Context::from_serialize(view).context(RenderSnafu { name: DASHBOARD })?;
        self.tera
            .render(DASHBOARD, &context)
            .context(RenderSnafu { name: DASHBOARD })
    }
}
