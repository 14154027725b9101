use chrono::{DateTime, LocalResult, TimeZone, Utc};
use mongodb::bson::DateTime as BsonDateTime;

pub fn chrono_to_bson(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

pub fn bson_to_iso(dt: &BsonDateTime) -> String {
    match Utc.timestamp_millis_opt(dt.timestamp_millis()) {
        LocalResult::Single(value) => value.to_rfc3339(),
        LocalResult::Ambiguous(first, _) => first.to_rfc3339(),
        LocalResult::None => Utc.timestamp_millis_opt(0).unwrap().to_rfc3339(),
    }
}
