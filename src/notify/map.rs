// src/notify/map.rs

/// Static map image provider for alert embeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticMap {
    Mapbox { token: String },
    Yandex,
}

impl StaticMap {
    /// Mapbox when a token is configured, otherwise the keyless Yandex map.
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(t) if !t.trim().is_empty() => StaticMap::Mapbox { token: t },
            _ => StaticMap::Yandex,
        }
    }

    pub fn image_url(&self, longitude: f64, latitude: f64, magnitude: f64) -> String {
        match self {
            StaticMap::Mapbox { token } => {
                let label = magnitude.floor().max(0.0) as u32;
                format!(
                    "https://api.mapbox.com/styles/v1/mapbox/streets-v11/static/\
                     pin-s-{label}+FF0000({longitude},{latitude})/\
                     {longitude},{latitude},7,0/600x400@2x?access_token={token}"
                )
            }
            StaticMap::Yandex => format!(
                "https://static-maps.yandex.ru/1.x/?l=map&size=400,300&z=7\
                 &ll={longitude},{latitude}&pt={longitude},{latitude},pmwtm1"
            ),
        }
    }
}
