/// Test fixtures: representative upstream payloads.
///
/// Structurally faithful but truncated to the minimum needed to exercise
/// the parsers.
///
/// Pollen CSV shape (one city, one day per request):
///   citycode,date,pollen
///   13101,2024-03-01T00:00:00+09:00,37
///
///   - `pollen` is an hourly-summed count; `-9999` means "no data".
///   - Older exports label the columns `city_code` / `datetime` / `value`.
///
/// Forecast JSON shape: see the module docs of `ingest::forecast`. Note
/// that `temperature.*.celsius` values are STRINGS and that the current
/// day's `min` is usually null.

/// Tokyo, single row, ordinary reading of 37.
#[cfg(test)]
pub(crate) fn fixture_pollen_csv_tokyo() -> &'static str {
    "citycode,date,pollen\n13101,2024-03-01T00:00:00+09:00,37\n"
}

/// Osaka from an older export with renamed columns.
#[cfg(test)]
pub(crate) fn fixture_pollen_csv_renamed_columns() -> &'static str {
    "city_code,datetime,value\n27128,20240301,8.5\n"
}

/// Sentinel, negative and non-numeric readings.
#[cfg(test)]
pub(crate) fn fixture_pollen_csv_sentinels() -> &'static str {
    "citycode,date,pollen\n\
     13101,2024-03-01,-9999\n\
     13102,2024-03-01,-5\n\
     13103,2024-03-01,abc\n"
}

/// Tokyo forecast: today (partial temperatures, placeholder chances) and
/// tomorrow (complete).
#[cfg(test)]
pub(crate) fn fixture_forecast_tokyo() -> &'static str {
    r#"{
      "publicTime": "2024-03-01T11:00:00+09:00",
      "title": "東京都 東京 の天気",
      "forecasts": [
        {
          "date": "2024-03-01",
          "dateLabel": "今日",
          "telop": "曇り時々雨",
          "detail": { "weather": "くもり　時々　雨", "wind": "北北東の風　強く" },
          "temperature": {
            "min": { "celsius": null, "fahrenheit": null },
            "max": { "celsius": "12", "fahrenheit": "53.6" }
          },
          "chanceOfRain": { "T00_06": "--%", "T06_12": "--%", "T12_18": "40%", "T18_24": "60%" }
        },
        {
          "date": "2024-03-02",
          "dateLabel": "明日",
          "telop": "晴れ",
          "detail": { "weather": "晴れ", "wind": "北西の風　弱く" },
          "temperature": {
            "min": { "celsius": "6", "fahrenheit": "42.8" },
            "max": { "celsius": "14", "fahrenheit": "57.2" }
          },
          "chanceOfRain": { "T00_06": "20%", "T06_12": "30%", "T12_18": "10%", "T18_24": "0%" }
        }
      ]
    }"#
}

/// Baseline file for Tokyo's pollen station.
#[cfg(test)]
pub(crate) fn fixture_baseline_tokyo() -> &'static str {
    r#"{ "station": "441321000", "pollenCount": 42, "timestamp": "2024-02-28T09:00:00+09:00" }"#
}

/// Sample snapshot: one usable Kyoto record, one record with no region id.
#[cfg(test)]
pub(crate) fn fixture_sample_snapshot() -> &'static str {
    r#"[
      {
        "region": "京都",
        "region_id": "kyoto",
        "prefecture": "京都府",
        "latitude": 35.0116,
        "longitude": 135.7681,
        "pollen_count": 18.0,
        "pollen_level": "moderate",
        "temperature": 11.0,
        "humidity": 55.0,
        "wind_speed": 2.0,
        "wind_direction": 90.0,
        "rainfall": 0.0,
        "timestamp": "2024-02-20T00:00:00",
        "raw": { "source": "sample" }
      },
      { "region": "不明", "pollen_count": 3.0 }
    ]"#
}
