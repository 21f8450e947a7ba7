use chronofact_models::{Post, PointId};
use serde_json::{Map, Value};

/// Converts a `Post` into the filterable JSON payload stored alongside its
/// named vectors. `timestamp_unix` duplicates `timestamp` as an epoch-second
/// integer so the vector store's numeric range filter can select on it —
/// RFC3339 strings aren't lexicographically range-filterable across a
/// payload index.
pub fn post_to_payload(post: &Post) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("text".into(), Value::String(post.text.clone()));
    map.insert("author".into(), Value::String(post.author.clone()));
    map.insert(
        "timestamp".into(),
        Value::String(post.timestamp.to_rfc3339()),
    );
    map.insert(
        "timestamp_unix".into(),
        Value::Number(post.timestamp.timestamp().into()),
    );
    map.insert(
        "credibility_score".into(),
        serde_json::Number::from_f64(post.credibility_score)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    );
    if let Some(location) = &post.location {
        map.insert("location".into(), Value::String(location.clone()));
    }
    map.insert("is_verified".into(), Value::Bool(post.is_verified));
    map.insert("fave_count".into(), Value::Number(post.fave_count.into()));
    map.insert(
        "retweet_count".into(),
        Value::Number(post.retweet_count.into()),
    );
    map.insert(
        "media_urls".into(),
        Value::Array(post.media_urls.iter().cloned().map(Value::String).collect()),
    );
    if let Some(caption) = &post.image_caption {
        map.insert("image_caption".into(), Value::String(caption.clone()));
    }
    map
}

/// Reconstructs a `Post` from a vector-store payload. Returns `None` if
/// any required field (§3) is missing or malformed — such a point is
/// treated as not-retrievable rather than panicking the caller.
pub fn payload_to_post(id: PointId, payload: &Map<String, Value>) -> Option<Post> {
    let text = payload.get("text")?.as_str()?.to_string();
    let author = payload.get("author")?.as_str()?.to_string();
    let timestamp = payload
        .get("timestamp")?
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))?;
    let credibility_score = payload.get("credibility_score")?.as_f64()?;

    Some(Post {
        post_id: id,
        text,
        author,
        timestamp,
        credibility_score,
        location: payload.get("location").and_then(|v| v.as_str()).map(String::from),
        is_verified: payload.get("is_verified").and_then(|v| v.as_bool()).unwrap_or(false),
        fave_count: payload.get("fave_count").and_then(|v| v.as_u64()).unwrap_or(0),
        retweet_count: payload.get("retweet_count").and_then(|v| v.as_u64()).unwrap_or(0),
        media_urls: payload
            .get("media_urls")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        image_caption: payload.get("image_caption").and_then(|v| v.as_str()).map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn round_trips_through_payload() {
        let post = Post {
            post_id: PointId::new(),
            text: "levees failed overnight".into(),
            author: "reporter1".into(),
            timestamp: Utc::now(),
            credibility_score: 0.75,
            location: Some("Mumbai".into()),
            is_verified: true,
            fave_count: 10,
            retweet_count: 3,
            media_urls: vec!["https://cdn.example.com/a.jpg".into()],
            image_caption: Some("flooded street".into()),
        };
        let payload = post_to_payload(&post);
        let restored = payload_to_post(post.post_id, &payload).expect("valid payload");
        assert_eq!(restored.text, post.text);
        assert_eq!(restored.author, post.author);
        assert_eq!(restored.location, post.location);
        assert!((restored.credibility_score - post.credibility_score).abs() < 1e-9);
    }
}
