use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde_json::Value;

use crate::capture::domain::capture_error::ValidationError;
use crate::capture::domain::face_crop::FaceCrop;
use crate::shared::config::ClientConfig;
use crate::shared::constants::{ATTENDANCE_PATH, UPLOAD_FILE_NAME};
use crate::submission::domain::attendance_service::{
    AttendanceService, EndpointKind, EnrollFields, SubmissionError,
};
use crate::submission::domain::receipts::{AttendanceRecord, SubmissionReceipt};

/// Talks to the attendance service over HTTP with multipart uploads.
pub struct HttpAttendanceClient {
    base_url: String,
    client: Client,
}

impl HttpAttendanceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SubmissionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmissionError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, SubmissionError> {
        Self::new(&config.service_url, config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn build_form(
        kind: EndpointKind,
        crop: &FaceCrop,
        fields: Option<&EnrollFields>,
    ) -> Result<Form, SubmissionError> {
        if crop.is_empty() {
            return Err(SubmissionError::Encoding(
                "encoded face image is empty".to_string(),
            ));
        }

        let mut form = Form::new();
        if kind.requires_fields() {
            let fields = fields.ok_or(SubmissionError::Invalid(ValidationError::MissingFields))?;
            fields.validate().map_err(SubmissionError::Invalid)?;
            form = form
                .text("name", fields.name.trim().to_string())
                .text("age", fields.age.trim().to_string());
        }

        let image = Part::bytes(crop.encoded().to_vec())
            .file_name(UPLOAD_FILE_NAME)
            .mime_str("image/jpeg")
            .map_err(|e| SubmissionError::Encoding(e.to_string()))?;
        Ok(form.part("image", image))
    }
}

/// Splits a response into success body or `Server` error.
fn read_response(response: Response) -> Result<(u16, String), SubmissionError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|e| SubmissionError::Network(e.to_string()))?;
    if !status.is_success() {
        return Err(SubmissionError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Ok((status.as_u16(), body))
}

impl AttendanceService for HttpAttendanceClient {
    fn submit(
        &self,
        kind: EndpointKind,
        crop: &FaceCrop,
        fields: Option<&EnrollFields>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let form = Self::build_form(kind, crop, fields)?;
        let url = self.url(kind.path());
        log::debug!("POST {url} ({} byte image)", crop.encoded().len());

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| SubmissionError::Network(e.to_string()))?;
        let (status, body) = read_response(response)?;

        let body = serde_json::from_str(&body).unwrap_or(Value::String(body));
        Ok(SubmissionReceipt::new(status, body))
    }

    fn fetch_attendance(&self) -> Result<Vec<AttendanceRecord>, SubmissionError> {
        let response = self
            .client
            .get(self.url(ATTENDANCE_PATH))
            .send()
            .map_err(|e| SubmissionError::Network(e.to_string()))?;
        let (_, body) = read_response(response)?;
        serde_json::from_str(&body).map_err(|e| SubmissionError::Server {
            status: 200,
            body: format!("unreadable attendance list: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::region::Region;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Answers one request with a canned response and hands back the raw
    /// request it received.
    fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
                head.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut body_bytes = vec![0u8; content_length];
            reader.read_exact(&mut body_bytes).unwrap();

            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).unwrap();
            head + &String::from_utf8_lossy(&body_bytes)
        });
        (url, handle)
    }

    fn crop() -> FaceCrop {
        FaceCrop::from_encoded(Region::new(93, 43, 214, 214), b"\xFF\xD8jpeg".to_vec(), 0, 0.9)
    }

    fn client(url: &str) -> HttpAttendanceClient {
        HttpAttendanceClient::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_enroll_posts_name_age_and_image() {
        let (url, server) = respond_once(
            "200 OK",
            r#"{"message":"Face registered successfully.","user_id":4,"name":"Ada","age":36}"#,
        );
        let fields = EnrollFields::new(" Ada ", "36");

        let receipt = client(&url)
            .submit(EndpointKind::Enroll, &crop(), Some(&fields))
            .unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /register-face "));
        assert!(request.contains("name=\"name\"\r\n\r\nAda\r\n"));
        assert!(request.contains("name=\"age\"\r\n\r\n36\r\n"));
        assert!(request.contains("name=\"image\"; filename=\"face.jpg\""));
        assert_eq!(receipt.status, 200);
        assert_eq!(receipt.registration().unwrap().user_id, 4);
    }

    #[test]
    fn test_verify_posts_only_image() {
        let (url, server) = respond_once("200 OK", r#"{"message":"No matching face found."}"#);

        let receipt = client(&url)
            .submit(EndpointKind::Verify, &crop(), Some(&EnrollFields::new("x", "1")))
            .unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /verify_face "));
        assert!(!request.contains("name=\"name\""));
        assert!(!request.contains("name=\"age\""));
        assert!(request.contains("name=\"image\""));
        assert_eq!(receipt.message(), Some("No matching face found."));
    }

    #[test]
    fn test_server_error_carries_status_and_body() {
        let (url, _server) = respond_once("500 Internal Server Error", "db error");
        let result = client(&url).submit(EndpointKind::Verify, &crop(), None);
        assert_eq!(
            result,
            Err(SubmissionError::Server {
                status: 500,
                body: "db error".to_string()
            })
        );
    }

    #[test]
    fn test_non_json_success_body_is_kept_as_text() {
        let (url, _server) = respond_once("200 OK", "accepted");
        let receipt = client(&url)
            .submit(EndpointKind::Verify, &crop(), None)
            .unwrap();
        assert_eq!(receipt.body, Value::String("accepted".to_string()));
    }

    #[test]
    fn test_zero_byte_crop_fails_before_network() {
        // Nothing listens here; reaching the network would be a Network error.
        let empty = FaceCrop::from_encoded(Region::new(0, 0, 10, 10), Vec::new(), 0, 0.9);
        let result = client("http://127.0.0.1:9").submit(EndpointKind::Verify, &empty, None);
        assert!(matches!(result, Err(SubmissionError::Encoding(_))));
    }

    #[test]
    fn test_enroll_without_fields_is_rejected_locally() {
        let result = client("http://127.0.0.1:9").submit(EndpointKind::Enroll, &crop(), None);
        assert_eq!(
            result.unwrap_err(),
            SubmissionError::Invalid(ValidationError::MissingFields)
        );
    }

    #[test]
    fn test_enroll_with_blank_name_is_rejected_locally() {
        let fields = EnrollFields::new("  ", "30");
        let result =
            client("http://127.0.0.1:9").submit(EndpointKind::Enroll, &crop(), Some(&fields));
        assert_eq!(
            result.unwrap_err(),
            SubmissionError::Invalid(ValidationError::MissingName)
        );
    }

    #[test]
    fn test_unreachable_service_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let result = client(&url).submit(EndpointKind::Verify, &crop(), None);
        assert!(matches!(result, Err(SubmissionError::Network(_))));
    }

    #[test]
    fn test_fetch_attendance_parses_records() {
        let (url, server) = respond_once(
            "200 OK",
            r#"[{"id":1,"name":"Lin","age":29,"created_at":"2024-03-01T09:30:00"}]"#,
        );
        let records = client(&format!("{url}/")).fetch_attendance().unwrap();

        assert!(server.join().unwrap().starts_with("GET /attendance "));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Lin");
        assert_eq!(records[0].age, 29);
    }
}
