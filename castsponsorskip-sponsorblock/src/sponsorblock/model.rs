use serde::Deserialize;

use castsponsorskip_core::core::segments::Segment;

/// A single element of the `skipSegments` hash-prefix response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoSegments {
    #[serde(rename = "videoID")]
    pub video_id: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

#[cfg(test)]
mod tests {
    use castsponsorskip_core::core::segments::Action;

    use super::*;

    #[test]
    fn test_video_segments_deserialize() {
        let result: Vec<VideoSegments> = serde_json::from_str(
            r#"[{
                "videoID": "fy9jO8JHaPo",
                "segments": [
                    {"segment": [53.433, 57.705], "category": "sponsor", "actionType": "skip", "UUID": "uuid-1"}
                ]
            }]"#,
        )
        .unwrap();

        assert_eq!(1, result.len());
        assert_eq!("fy9jO8JHaPo", result[0].video_id);
        assert_eq!(Action::Skip, result[0].segments[0].action_type);
    }
}
