//! Single-file `multipart/form-data` envelope.
//!
//! The payload is streamed between [`Envelope::head`] and [`Envelope::tail`],
//! so the body length is known up front without buffering the file.

/// Envelope around one file part.
#[derive(Debug, Clone)]
pub struct Envelope {
    boundary: String,
    field: String,
    filename: String,
    content_type: String,
}

impl Envelope {
    /// New envelope with a random boundary.
    pub fn new(field: &str, filename: &str) -> Self {
        Self::with_boundary(
            &format!("edge-{}", uuid::Uuid::new_v4().simple()),
            field,
            filename,
        )
    }

    pub fn with_boundary(boundary: &str, field: &str, filename: &str) -> Self {
        Envelope {
            boundary: boundary.to_string(),
            field: field.to_string(),
            filename: filename.replace(['"', '\r', '\n'], "_"),
            content_type: "application/octet-stream".to_string(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn head(&self) -> Vec<u8> {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary, self.field, self.filename, self.content_type
        )
        .into_bytes()
    }

    pub fn tail(&self) -> Vec<u8> {
        format!("\r\n--{}--\r\n", self.boundary).into_bytes()
    }

    /// Bytes added around the payload, measured by rendering an empty part.
    pub fn overhead(&self) -> u64 {
        let mut empty = self.head();
        empty.extend_from_slice(&self.tail());
        empty.len() as u64
    }

    /// Total body length for a payload of `payload_len` bytes.
    pub fn content_length(&self, payload_len: u64) -> u64 {
        payload_len + self.overhead()
    }
}
