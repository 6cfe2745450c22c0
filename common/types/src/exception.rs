use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::validation::ValidationError;

pub const FRAMEWORK_JVM: &str = "jvm";
pub const FRAMEWORK_APPLE: &str = "apple";
pub const FRAMEWORK_DART: &str = "dart";

const UNKNOWN_TYPE: &str = "unknown type";
const FINGERPRINT_SEPARATOR: &str = ":";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub line_num: i32,
    pub col_num: i32,
    pub module_name: String,
    pub file_name: String,
    pub class_name: String,
    pub method_name: String,
    pub in_app: bool,
    pub instruction_addr: String,
    pub binary_name: String,
    pub binary_address: String,
    pub frame_index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionUnit {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub frames: Vec<Frame>,
    /// BSD termination signal, only reported by Apple platforms.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signal: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thread_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thread {
    pub name: String,
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryImage {
    pub start_addr: String,
    pub end_addr: String,
    pub base_addr: String,
    pub system: bool,
    pub name: String,
    pub arch: String,
    pub uuid: String,
    pub path: String,
}

/// Generic error object Apple platforms may report instead of, or next to,
/// a stacktrace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionError {
    pub numcode: i64,
    pub code: String,
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl ExceptionError {
    pub fn is_empty(&self) -> bool {
        self.code.is_empty() && self.numcode == 0 && self.meta.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    Jvm,
    Apple,
    Dart,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exception {
    pub handled: bool,
    pub exceptions: Vec<ExceptionUnit>,
    pub threads: Vec<Thread>,
    pub fingerprint: String,
    pub foreground: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binary_images: Vec<BinaryImage>,
    pub framework: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExceptionError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Anr {
    pub handled: bool,
    pub exceptions: Vec<ExceptionUnit>,
    pub threads: Vec<Thread>,
    pub fingerprint: String,
    pub foreground: bool,
}

/// The representative fields of a crash or ANR, used to seed a new issue
/// group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSignature {
    pub fingerprint: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub method_name: String,
    pub file_name: String,
    pub line_number: i32,
}

fn digest(parts: &[&str]) -> String {
    let input = parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(FINGERPRINT_SEPARATOR);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn first_frame(unit: &ExceptionUnit) -> Option<&Frame> {
    unit.frames.first()
}

impl Exception {
    /// Frameworks are sent explicitly by newer SDKs; older payloads are
    /// inferred from their shape.
    pub fn framework(&self) -> Framework {
        match self.framework.as_str() {
            FRAMEWORK_JVM => return Framework::Jvm,
            FRAMEWORK_APPLE => return Framework::Apple,
            FRAMEWORK_DART => return Framework::Dart,
            _ => {}
        }

        match self.exceptions.first() {
            Some(unit) if !unit.signal.is_empty() => Framework::Apple,
            Some(_) => Framework::Jvm,
            None if self.has_error() => Framework::Apple,
            None => Framework::Jvm,
        }
    }

    pub fn has_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_empty())
    }

    fn innermost(&self) -> Option<&ExceptionUnit> {
        self.exceptions.last()
    }

    fn outermost(&self) -> Option<&ExceptionUnit> {
        self.exceptions.first()
    }

    /// First in-app frame across all units, else the first unit's first frame.
    pub fn relevant_frame(&self) -> Option<&Frame> {
        self.exceptions
            .iter()
            .flat_map(|unit| unit.frames.iter())
            .find(|frame| frame.in_app)
            .or_else(|| self.outermost().and_then(first_frame))
    }

    fn signature_frame(&self) -> Option<&Frame> {
        match self.framework() {
            Framework::Jvm | Framework::Dart => self.innermost().and_then(first_frame),
            Framework::Apple => self.relevant_frame(),
        }
    }

    pub fn kind(&self) -> String {
        match self.framework() {
            Framework::Jvm => self.innermost().map(|u| u.kind.clone()),
            Framework::Dart => self.outermost().map(|u| u.kind.clone()),
            Framework::Apple => match self.outermost() {
                Some(unit) => Some(unit.signal.clone()),
                None => self
                    .error
                    .as_ref()
                    .filter(|e| !e.code.is_empty())
                    .map(|e| e.code.clone()),
            },
        }
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string())
    }

    pub fn message(&self) -> String {
        match self.framework() {
            Framework::Jvm => self.innermost().map(|u| u.message.clone()),
            Framework::Dart => self.outermost().map(|u| u.message.clone()),
            Framework::Apple => None,
        }
        .unwrap_or_default()
    }

    pub fn method_name(&self) -> String {
        self.signature_frame()
            .map(|f| f.method_name.clone())
            .unwrap_or_default()
    }

    pub fn file_name(&self) -> String {
        self.signature_frame()
            .map(|f| f.file_name.clone())
            .unwrap_or_default()
    }

    pub fn line_number(&self) -> i32 {
        self.signature_frame().map(|f| f.line_num).unwrap_or_default()
    }

    /// Content hash identifying the crash's shape. Apple exceptions that
    /// only carry an error object have no stacktrace and get no fingerprint.
    pub fn compute_fingerprint(&mut self) {
        if !self.has_exceptions() {
            self.fingerprint = String::new();
            return;
        }

        let fingerprint = match self.framework() {
            Framework::Jvm => {
                let unit = self.innermost();
                let frame = unit.and_then(first_frame);
                digest(&[
                    unit.map(|u| u.kind.as_str()).unwrap_or_default(),
                    frame.map(|f| f.method_name.as_str()).unwrap_or_default(),
                    frame.map(|f| f.file_name.as_str()).unwrap_or_default(),
                ])
            }
            Framework::Apple => {
                let kind = self.kind();
                let frame = self.relevant_frame();
                digest(&[
                    kind.as_str(),
                    frame.map(|f| f.method_name.as_str()).unwrap_or_default(),
                    frame.map(|f| f.file_name.as_str()).unwrap_or_default(),
                ])
            }
            Framework::Dart => {
                let unit = self.outermost();
                let frame = unit.and_then(first_frame);
                digest(&[
                    unit.map(|u| u.kind.as_str()).unwrap_or_default(),
                    frame.map(|f| f.method_name.as_str()).unwrap_or_default(),
                    frame.map(|f| f.file_name.as_str()).unwrap_or_default(),
                ])
            }
        };

        self.fingerprint = fingerprint;
    }

    pub fn signature(&self) -> IssueSignature {
        IssueSignature {
            fingerprint: self.fingerprint.clone(),
            kind: self.kind(),
            message: self.message(),
            method_name: self.method_name(),
            file_name: self.file_name(),
            line_number: self.line_number(),
        }
    }

    pub fn needs_symbolication(&self) -> bool {
        match self.framework() {
            Framework::Jvm => true,
            Framework::Apple => self.has_exceptions(),
            Framework::Dart => self
                .outermost()
                .and_then(first_frame)
                .is_some_and(|f| !f.instruction_addr.is_empty()),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.framework() {
            Framework::Jvm => {
                if self.exceptions.is_empty() {
                    return Err(ValidationError::Invalid {
                        field: "exception",
                        reason: "must contain at least one exception".to_string(),
                    });
                }
                if self.threads.is_empty() {
                    return Err(ValidationError::Invalid {
                        field: "exception.threads",
                        reason: "must contain at least one thread".to_string(),
                    });
                }
            }
            Framework::Apple => {
                if !self.has_error() {
                    if self.exceptions.is_empty() {
                        return Err(ValidationError::Invalid {
                            field: "exception",
                            reason: "must contain at least one exception".to_string(),
                        });
                    }
                    if self.threads.is_empty() {
                        return Err(ValidationError::Invalid {
                            field: "exception.threads",
                            reason: "must contain at least one thread".to_string(),
                        });
                    }
                }
                for image in &self.binary_images {
                    for (field, value) in [
                        ("exception.binary_images.start_addr", &image.start_addr),
                        ("exception.binary_images.end_addr", &image.end_addr),
                        ("exception.binary_images.name", &image.name),
                        ("exception.binary_images.path", &image.path),
                    ] {
                        if value.is_empty() {
                            return Err(ValidationError::Missing(field));
                        }
                    }
                }
            }
            Framework::Dart => {
                if self.exceptions.is_empty() {
                    return Err(ValidationError::Invalid {
                        field: "exception",
                        reason: "must contain at least one exception".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Anr {
    fn innermost(&self) -> Option<&ExceptionUnit> {
        self.exceptions.last()
    }

    fn signature_frame(&self) -> Option<&Frame> {
        self.innermost().and_then(first_frame)
    }

    pub fn kind(&self) -> String {
        self.innermost()
            .map(|u| u.kind.clone())
            .unwrap_or_else(|| UNKNOWN_TYPE.to_string())
    }

    pub fn message(&self) -> String {
        self.innermost().map(|u| u.message.clone()).unwrap_or_default()
    }

    pub fn compute_fingerprint(&mut self) {
        let Some(unit) = self.innermost() else {
            self.fingerprint = String::new();
            return;
        };
        let frame = first_frame(unit);
        self.fingerprint = digest(&[
            unit.kind.as_str(),
            frame.map(|f| f.method_name.as_str()).unwrap_or_default(),
            frame.map(|f| f.file_name.as_str()).unwrap_or_default(),
        ]);
    }

    pub fn signature(&self) -> IssueSignature {
        let frame = self.signature_frame();
        IssueSignature {
            fingerprint: self.fingerprint.clone(),
            kind: self.kind(),
            message: self.message(),
            method_name: frame.map(|f| f.method_name.clone()).unwrap_or_default(),
            file_name: frame.map(|f| f.file_name.clone()).unwrap_or_default(),
            line_number: frame.map(|f| f.line_num).unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.exceptions.is_empty() || self.threads.is_empty() {
            return Err(ValidationError::Invalid {
                field: "anr",
                reason: "must contain at least one anr & thread".to_string(),
            });
        }
        Ok(())
    }
}
