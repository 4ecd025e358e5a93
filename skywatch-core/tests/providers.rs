//! Provider adapters against mock vendor APIs.

use skywatch_core::{
    Coordinates, ProviderId, WeatherError, WeatherProvider,
    condition::WeatherCondition,
    model::Severity,
    provider::{
        accuweather::AccuWeatherProvider, openweather::OpenWeatherProvider,
        tomorrow::TomorrowIoProvider, weatherapi::WeatherApiProvider,
    },
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn lyon() -> Coordinates {
    Coordinates { lat: 45.76, lon: 4.84 }
}

// 2024-07-01T12:00:00Z
const NOON: i64 = 1_719_835_200;

#[tokio::test]
async fn openweather_current_conditions() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("appid", "test-key"))
        .and(query_param("units", "metric"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "coord": { "lat": 45.76, "lon": 4.84 },
            "name": "Lyon",
            "dt": NOON,
            "main": { "temp": 31.5, "feels_like": 33.0, "pressure": 1012, "humidity": 40 },
            "weather": [{ "id": 800, "description": "clear sky" }],
            "wind": { "speed": 3.6, "deg": 200, "gust": 7.2 },
            "visibility": 10000,
            "clouds": { "all": 0 },
            "sys": { "country": "FR", "sunrise": NOON - 21_600, "sunset": NOON + 34_200 }
        })))
        .mount(&mock_server)
        .await;

    let provider = OpenWeatherProvider::new("test-key".into()).with_base_url(mock_server.uri());
    let current = provider.current(lyon()).await.unwrap();

    assert_eq!(current.provider, ProviderId::OpenWeather);
    assert_eq!(current.place.name, "Lyon");
    assert_eq!(current.place.country.as_deref(), Some("FR"));
    assert_eq!(current.temperature_c, 31.5);
    assert_eq!(current.humidity_pct, 40);
    assert_eq!(current.visibility_km, Some(10.0));
    assert_eq!(current.condition, WeatherCondition::Clear);
    assert!(current.sunrise.is_some());
}

#[tokio::test]
async fn openweather_forecast_aggregates_by_local_day() {
    let mock_server = MockServer::start().await;

    let step = |dt: i64, temp: f64, id: u32, pop: f64| {
        serde_json::json!({
            "dt": dt,
            "main": { "temp": temp, "feels_like": temp, "temp_min": temp - 1.0, "temp_max": temp + 1.0, "humidity": 40 },
            "weather": [{ "id": id, "description": "x" }],
            "wind": { "speed": 3.0 },
            "pop": pop,
            "rain": { "3h": if id == 500 { 1.2 } else { 0.0 } }
        })
    };

    Mock::given(method("GET"))
        .and(path("/data/2.5/forecast"))
        .and(query_param("cnt", "16"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "city": {
                "name": "Lyon",
                "country": "FR",
                "coord": { "lat": 45.76, "lon": 4.84 },
                "timezone": 7200
            },
            "list": [
                step(NOON, 30.0, 800, 0.2),
                step(NOON + 10_800, 26.0, 500, 0.8),
                step(NOON + 86_400, 24.0, 800, 0.0)
            ]
        })))
        .mount(&mock_server)
        .await;

    let provider = OpenWeatherProvider::new("test-key".into()).with_base_url(mock_server.uri());
    let forecast = provider.forecast(lyon(), 2).await.unwrap();

    assert_eq!(forecast.hourly.len(), 3);
    assert_eq!(forecast.daily.len(), 2);

    let today = &forecast.daily[0];
    assert_eq!(today.high_c, 31.0);
    assert_eq!(today.low_c, 25.0);
    assert_eq!(today.precipitation_probability_pct, 80);
    assert_eq!(today.precipitation_mm, 1.2);
    assert_eq!(today.condition, WeatherCondition::Clear);
}

#[tokio::test]
async fn openweather_bad_key_reports_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "cod": 401,
            "message": "Invalid API key"
        })))
        .mount(&mock_server)
        .await;

    let provider = OpenWeatherProvider::new("wrong".into()).with_base_url(mock_server.uri());
    let err = provider.current(lyon()).await.unwrap_err();

    match err.downcast_ref::<WeatherError>() {
        Some(WeatherError::Status { provider, status, body, .. }) => {
            assert_eq!(*provider, ProviderId::OpenWeather);
            assert_eq!(*status, 401);
            assert!(body.contains("Invalid API key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn openweather_search_maps_places() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/geo/1.0/direct"))
        .and(query_param("q", "Lyon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "Lyon", "lat": 45.75, "lon": 4.83, "country": "FR", "state": "Auvergne-Rhône-Alpes" }
        ])))
        .mount(&mock_server)
        .await;

    let provider = OpenWeatherProvider::new("test-key".into()).with_base_url(mock_server.uri());
    let places = provider.search("Lyon").await.unwrap();

    assert_eq!(places.len(), 1);
    assert_eq!(places[0].region.as_deref(), Some("Auvergne-Rhône-Alpes"));
    assert_eq!(places[0].coordinates.cache_key(), "45.75,4.83");
}

#[tokio::test]
async fn weatherapi_current_converts_wind() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/current.json"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "location": {
                "name": "Lyon",
                "region": "Rhone-Alpes",
                "country": "France",
                "lat": 45.75,
                "lon": 4.85,
                "localtime_epoch": NOON,
                "localtime": "2024-07-01 14:00"
            },
            "current": {
                "last_updated_epoch": NOON,
                "temp_c": 25.0,
                "feelslike_c": 26.0,
                "humidity": 50,
                "wind_kph": 36.0,
                "gust_kph": 54.0,
                "wind_degree": 180,
                "pressure_mb": 1010.0,
                "precip_mm": 0.0,
                "cloud": 25,
                "vis_km": 10.0,
                "uv": 6.0,
                "condition": { "text": "Partly cloudy", "code": 1003 }
            }
        })))
        .mount(&mock_server)
        .await;

    let provider = WeatherApiProvider::new("test-key".into()).with_base_url(mock_server.uri());
    let current = provider.current(lyon()).await.unwrap();

    assert!((current.wind_speed_mps - 10.0).abs() < 1e-9);
    assert!((current.wind_gust_mps.unwrap() - 15.0).abs() < 1e-9);
    assert_eq!(current.place.region.as_deref(), Some("Rhone-Alpes"));
    assert_eq!(current.condition, WeatherCondition::PartlyCloudy);
}

#[tokio::test]
async fn weatherapi_alerts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast.json"))
        .and(query_param("alerts", "yes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "location": {
                "name": "Lyon",
                "region": "Rhone-Alpes",
                "country": "France",
                "lat": 45.75,
                "lon": 4.85,
                "localtime_epoch": NOON,
                "localtime": "2024-07-01 14:00"
            },
            "forecast": {
                "forecastday": [{
                    "date": "2024-07-01",
                    "day": {
                        "maxtemp_c": 30.0,
                        "mintemp_c": 18.0,
                        "maxwind_kph": 20.0,
                        "totalprecip_mm": 4.0,
                        "avghumidity": 60.0,
                        "daily_chance_of_rain": 70,
                        "daily_chance_of_snow": 0,
                        "uv": 7.0,
                        "condition": { "text": "Thundery outbreaks", "code": 1087 }
                    },
                    "astro": { "sunrise": "05:58 AM", "sunset": "09:30 PM" },
                    "hour": []
                }]
            },
            "alerts": {
                "alert": [{
                    "headline": "Thunderstorm warning",
                    "severity": "Severe",
                    "areas": "Rhone",
                    "event": "Thunderstorms",
                    "effective": "2024-07-01T12:00:00+00:00",
                    "expires": "2099-07-01T18:00:00+00:00",
                    "desc": "Strong storms with hail"
                }]
            }
        })))
        .mount(&mock_server)
        .await;

    let provider = WeatherApiProvider::new("test-key".into()).with_base_url(mock_server.uri());
    let alerts = provider.alerts(lyon()).await.unwrap();

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, "Thunderstorms@2024-07-01T12:00:00+00:00");
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].areas.as_deref(), Some("Rhone"));
    assert!(alerts[0].is_active(chrono::Utc::now()));
}

#[tokio::test]
async fn tomorrow_realtime_splits_location_name() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4/weather/realtime"))
        .and(query_param("apikey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "time": "2024-07-01T12:00:00Z",
                "values": {
                    "temperature": 18.5,
                    "temperatureApparent": 18.0,
                    "humidity": 70,
                    "windSpeed": 4.2,
                    "windDirection": 365,
                    "weatherCode": 4001,
                    "precipitationProbability": 60,
                    "rainIntensity": 1.5
                }
            },
            "location": {
                "lat": 45.76,
                "lon": 4.84,
                "name": "Lyon, Rhône, Auvergne-Rhône-Alpes, France"
            }
        })))
        .mount(&mock_server)
        .await;

    let provider = TomorrowIoProvider::new("test-key".into()).with_base_url(mock_server.uri());
    let current = provider.current(lyon()).await.unwrap();

    assert_eq!(current.place.name, "Lyon");
    assert_eq!(current.place.region.as_deref(), Some("Auvergne-Rhône-Alpes"));
    assert_eq!(current.place.country.as_deref(), Some("France"));
    assert_eq!(current.wind_direction_deg, Some(5));
    assert_eq!(current.precipitation_mm, 1.5);
    assert_eq!(current.condition, WeatherCondition::Rain);

    let err = provider.search("Lyon").await.unwrap_err();
    assert!(err.downcast_ref::<WeatherError>().is_some_and(WeatherError::is_unsupported));
}

#[tokio::test]
async fn accuweather_resolves_location_key_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/locations/v1/cities/geoposition/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Key": "623",
            "LocalizedName": "Lyon",
            "AdministrativeArea": { "LocalizedName": "Rhône" },
            "Country": { "LocalizedName": "France" },
            "GeoPosition": { "Latitude": 45.76, "Longitude": 4.84 }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/currentconditions/v1/623"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "EpochTime": NOON,
            "WeatherText": "Sunny",
            "WeatherIcon": 1,
            "Temperature": { "Metric": { "Value": 27.0 }, "Imperial": { "Value": 80.6 } },
            "RelativeHumidity": 45,
            "Wind": { "Direction": { "Degrees": 90 }, "Speed": { "Metric": { "Value": 18.0 } } },
            "UVIndex": 7,
            "Visibility": { "Metric": { "Value": 16.1 } }
        }])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let provider = AccuWeatherProvider::new("test-key".into()).with_base_url(mock_server.uri());
    let first = provider.current(lyon()).await.unwrap();
    let second = provider.current(lyon()).await.unwrap();

    assert_eq!(first.place.region.as_deref(), Some("Rhône"));
    assert!((first.wind_speed_mps - 5.0).abs() < 1e-9);
    assert_eq!(first.uv_index, Some(7.0));
    assert_eq!(second.description, "Sunny");

    let err = provider.air_quality(lyon()).await.unwrap_err();
    assert!(err.downcast_ref::<WeatherError>().is_some_and(WeatherError::is_unsupported));
}
