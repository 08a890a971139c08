use serde::{Deserialize, Serialize};

/// Envelope shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            count: None,
            total: None,
            total_pages: None,
            current_page: None,
            warnings: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            count: None,
            total: None,
            total_pages: None,
            current_page: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_page(mut self, count: u64, total: u64, total_pages: u64, current_page: u64) -> Self {
        self.count = Some(count);
        self.total = Some(total);
        self.total_pages = Some(total_pages);
        self.current_page = Some(current_page);
        self
    }
}

impl ApiResponse<()> {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            count: None,
            total: None,
            total_pages: None,
            current_page: None,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_uses_camel_case_and_skips_empty_fields() {
        let body = serde_json::to_value(ApiResponse::ok(vec![1, 2]).with_page(2, 12, 2, 1)).unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["totalPages"], 2);
        assert_eq!(body["currentPage"], 1);
        assert!(body.get("message").is_none());
        assert!(body.get("warnings").is_none());
    }

    #[test]
    fn test_failure_has_no_data() {
        let body = serde_json::to_value(ApiResponse::<()>::failure("Appointment not found")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Appointment not found");
        assert!(body.get("data").is_none());
    }
}
