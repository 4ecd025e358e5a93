use serde::{Deserialize, Serialize};

/// Normalized weather condition shared by all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
    Windy,
    #[default]
    Unknown,
}

impl WeatherCondition {
    /// OpenWeather condition id (`weather[].id`).
    /// See: https://openweathermap.org/weather-conditions
    pub fn from_openweather_id(id: u32) -> Self {
        match id {
            200..=232 => Self::Thunderstorm,
            300..=321 => Self::Drizzle,
            500 | 501 | 520 | 521 => Self::Rain,
            502..=504 | 522 | 531 => Self::HeavyRain,
            511 | 611..=616 => Self::Sleet,
            600..=602 | 620..=622 => Self::Snow,
            701..=762 => Self::Fog,
            771 | 781 => Self::Windy,
            800 => Self::Clear,
            801 | 802 => Self::PartlyCloudy,
            803 | 804 => Self::Cloudy,
            _ => Self::Unknown,
        }
    }

    /// WeatherAPI.com condition code (`condition.code`).
    pub fn from_weatherapi_code(code: u32) -> Self {
        match code {
            1000 => Self::Clear,
            1003 => Self::PartlyCloudy,
            1006 | 1009 => Self::Cloudy,
            1030 | 1135 | 1147 => Self::Fog,
            1150 | 1153 => Self::Drizzle,
            1063 | 1180 | 1183 | 1186 | 1189 | 1240 => Self::Rain,
            1192 | 1195 | 1243 | 1246 => Self::HeavyRain,
            1066 | 1114 | 1117 | 1210..=1225 | 1255 | 1258 => Self::Snow,
            1069 | 1072 | 1168 | 1171 | 1198 | 1201 | 1204 | 1207 | 1237 | 1249 | 1252
            | 1261 | 1264 => Self::Sleet,
            1087 | 1273 | 1276 | 1279 | 1282 => Self::Thunderstorm,
            _ => Self::Unknown,
        }
    }

    /// AccuWeather icon number (`WeatherIcon`, 1..=44).
    pub fn from_accuweather_icon(icon: u32) -> Self {
        match icon {
            1 | 2 | 30 | 31 | 33 | 34 => Self::Clear,
            3 | 4 | 35 | 36 => Self::PartlyCloudy,
            6 | 7 | 8 | 38 => Self::Cloudy,
            5 | 11 | 37 => Self::Fog,
            12 | 13 | 14 | 18 | 39 | 40 => Self::Rain,
            15 | 16 | 17 | 41 | 42 => Self::Thunderstorm,
            19..=23 | 43 | 44 => Self::Snow,
            24..=26 | 29 => Self::Sleet,
            32 => Self::Windy,
            _ => Self::Unknown,
        }
    }

    /// Tomorrow.io weather code (`weatherCode`).
    pub fn from_tomorrow_code(code: u32) -> Self {
        match code {
            1000 | 1100 => Self::Clear,
            1101 => Self::PartlyCloudy,
            1102 | 1001 => Self::Cloudy,
            2000 | 2100 => Self::Fog,
            4000 => Self::Drizzle,
            4001 | 4200 => Self::Rain,
            4201 => Self::HeavyRain,
            5000 | 5001 | 5100 | 5101 => Self::Snow,
            6000 | 6001 | 6200 | 6201 | 7000 | 7101 | 7102 => Self::Sleet,
            8000 => Self::Thunderstorm,
            _ => Self::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
            Self::Windy => "Windy",
            Self::Unknown => "Unknown",
        }
    }

    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::Clear => "sun",
            Self::PartlyCloudy => "cloud_sun",
            Self::Cloudy => "cloud",
            Self::Fog => "cloud_fog",
            Self::Drizzle | Self::Rain | Self::HeavyRain => "cloud_rain",
            Self::Snow | Self::Sleet => "cloud_snow",
            Self::Thunderstorm => "cloud_lightning",
            Self::Windy => "wind",
            Self::Unknown => "question",
        }
    }

    pub fn is_wet(&self) -> bool {
        matches!(
            self,
            Self::Drizzle | Self::Rain | Self::HeavyRain | Self::Snow | Self::Sleet | Self::Thunderstorm
        )
    }
}
