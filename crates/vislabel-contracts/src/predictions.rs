use serde::{Deserialize, Serialize};

/// Text carried by a prediction whose task could not be completed.
pub const ERROR_MARKER: &str = "ERROR: 预测失败";

pub const RESULT_TYPE: &str = "textarea";
pub const FROM_NAME: &str = "model_description";
pub const TO_NAME: &str = "image_display";
pub const MODEL_TYPE: &str = "ImageModel";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextValue {
    pub text: String,
    pub model_type: String,
}

/// One labeling-UI region. Field names follow the host's result schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub from_name: String,
    pub to_name: String,
    pub value: TextValue,
}

impl ResultEntry {
    pub fn textarea(text: impl Into<String>) -> Self {
        Self {
            kind: RESULT_TYPE.to_string(),
            from_name: FROM_NAME.to_string(),
            to_name: TO_NAME.to_string(),
            value: TextValue {
                text: text.into(),
                model_type: MODEL_TYPE.to_string(),
            },
        }
    }
}

/// Prediction returned to the annotation host for exactly one task.
///
/// Success and failure records share one shape; only `value.text` differs,
/// so consumers never branch on outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub result: Vec<ResultEntry>,
    pub model_version: String,
}

impl PredictionRecord {
    pub fn text(text: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            result: vec![ResultEntry::textarea(text)],
            model_version: model_version.into(),
        }
    }

    pub fn failed(model_version: impl Into<String>) -> Self {
        Self::text(ERROR_MARKER, model_version)
    }

    pub fn text_value(&self) -> Option<&str> {
        self.result.first().map(|entry| entry.value.text.as_str())
    }

    pub fn is_error_marker(&self) -> bool {
        self.text_value() == Some(ERROR_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{PredictionRecord, ERROR_MARKER};

    #[test]
    fn success_record_matches_host_schema() -> anyhow::Result<()> {
        let record = PredictionRecord::text("A cat on a sofa.", "Doubao-1.5-Vison-Pro");
        let value = serde_json::to_value(&record)?;
        assert_eq!(
            value,
            json!({
                "result": [{
                    "type": "textarea",
                    "from_name": "model_description",
                    "to_name": "image_display",
                    "value": { "text": "A cat on a sofa.", "model_type": "ImageModel" }
                }],
                "model_version": "Doubao-1.5-Vison-Pro"
            })
        );
        Ok(())
    }

    #[test]
    fn failed_record_differs_only_in_text() -> anyhow::Result<()> {
        let ok = serde_json::to_value(PredictionRecord::text("fine", "v1"))?;
        let failed_record = PredictionRecord::failed("v1");
        assert!(failed_record.is_error_marker());
        let failed = serde_json::to_value(&failed_record)?;

        assert_eq!(failed["result"][0]["value"]["text"], json!(ERROR_MARKER));
        for key in ["type", "from_name", "to_name"] {
            assert_eq!(ok["result"][0][key], failed["result"][0][key]);
        }
        assert_eq!(
            ok["result"][0]["value"]["model_type"],
            failed["result"][0]["value"]["model_type"]
        );
        assert_eq!(ok["model_version"], failed["model_version"]);
        Ok(())
    }
}
