use anyhow::Result;
use storage::SettingsStore;

pub const ROOM_NAME_KEY: &str = "room_name";
pub const ROOM_LABEL_KEY: &str = "room_label";

/// Host-chosen room name and banner label, persisted next to the whitelist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomIdentity {
    pub name: String,
    pub label: String,
}

impl RoomIdentity {
    pub async fn load(settings: &dyn SettingsStore) -> Result<Self> {
        Ok(Self {
            name: settings.get(ROOM_NAME_KEY).await?.unwrap_or_default(),
            label: settings.get(ROOM_LABEL_KEY).await?.unwrap_or_default(),
        })
    }

    pub async fn save(&self, settings: &dyn SettingsStore) -> Result<()> {
        settings.set(ROOM_NAME_KEY, &self.name).await?;
        settings.set(ROOM_LABEL_KEY, &self.label).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemorySettings;

    #[tokio::test]
    async fn loads_defaults_when_unset() {
        let store = MemorySettings::new();
        let identity = RoomIdentity::load(&store).await.expect("load");
        assert_eq!(identity, RoomIdentity::default());
    }

    #[tokio::test]
    async fn round_trips_name_and_label() {
        let store = MemorySettings::new();
        let identity = RoomIdentity {
            name: "listen-along".to_string(),
            label: "Hosted by Ann".to_string(),
        };
        identity.save(&store).await.expect("save");

        let loaded = RoomIdentity::load(&store).await.expect("load");
        assert_eq!(loaded, identity);
    }
}
