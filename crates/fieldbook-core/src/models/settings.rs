//! Local settings model

use serde::{Deserialize, Serialize};

/// Attribution used when nobody has set a display name
pub const UNKNOWN_USER: &str = "Unknown User";

/// Device-local settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Name stamped into `createdBy` on new records
    pub display_name: Option<String>,
}

impl Settings {
    /// Attribution string for new records
    pub fn created_by(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_USER.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_attribution() {
        assert_eq!(Settings::default().created_by(), "Unknown User");
    }

    #[test]
    fn test_settings_display_name_attribution() {
        let settings = Settings {
            display_name: Some("Site Lead".to_string()),
        };
        assert_eq!(settings.created_by(), "Site Lead");
    }
}
