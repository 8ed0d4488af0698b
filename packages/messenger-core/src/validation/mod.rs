use regex::Regex;
use std::sync::OnceLock;
use crate::{types::SendMessageParams, Error};

pub const MAX_MESSAGE_LENGTH: usize = 1000;

static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();
static PROTOCOL_RE: OnceLock<Regex> = OnceLock::new();
static UNSAFE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn address_re() -> &'static Regex {
    ADDRESS_RE.get_or_init(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap())
}

fn protocol_re() -> &'static Regex {
    PROTOCOL_RE.get_or_init(|| Regex::new(r"(?i)javascript:|data:").unwrap())
}

fn unsafe_patterns() -> &'static [Regex] {
    UNSAFE_PATTERNS.get_or_init(|| {
        [
            r"(?i)<script",
            r"(?i)javascript:",
            r"(?i)data:text/html",
            r"(?i)vbscript:",
            r"(?i)onload=",
            r"(?i)onerror=",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// 单个字段的校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl Validation {
    pub fn valid() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(reason.into()) }
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self.error {
            Some(reason) if !self.is_valid => Err(Error::Validation(reason)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

/// `0x` 加 40 位十六进制字符
pub fn validate_address(address: &str) -> bool {
    address_re().is_match(address)
}

/// 去掉 `<>'"&` 与 `javascript:`/`data:` 协议片段，再去除首尾空白。
/// 协议片段反复删除直到不再出现，因此结果是幂等的。
pub fn sanitize_input(input: &str) -> String {
    let mut out: String = input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '\'' | '"' | '&'))
        .collect();

    while protocol_re().is_match(&out) {
        out = protocol_re().replace_all(&out, "").into_owned();
    }

    out.trim().to_string()
}

pub fn validate_message(message: &str) -> Validation {
    if message.trim().is_empty() {
        return Validation::invalid("Message cannot be empty");
    }

    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Validation::invalid("Message must be less than 1000 characters");
    }

    if unsafe_patterns().iter().any(|p| p.is_match(message)) {
        return Validation::invalid("Message contains potentially unsafe content");
    }

    Validation::valid()
}

pub fn validate_chain_selection(source_chain: &str, destination_chain: &str) -> Validation {
    if source_chain.is_empty() || destination_chain.is_empty() {
        return Validation::invalid("Both source and destination chains must be selected");
    }

    if source_chain == destination_chain {
        return Validation::invalid("Source and destination chains must be different");
    }

    Validation::valid()
}

pub fn validate_recipient(recipient: &str) -> Validation {
    if recipient.trim().is_empty() {
        return Validation::invalid("Recipient address is required");
    }
    if !validate_address(recipient) {
        return Validation::invalid("Invalid Ethereum address format");
    }
    Validation::valid()
}

/// 对整张表单逐字段校验，返回全部失败字段
pub fn validate_form(params: &SendMessageParams) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Some(reason) = validate_message(&params.message).error {
        errors.push(FieldError { field: "message", reason });
    }
    if let Some(reason) = validate_recipient(&params.recipient).error {
        errors.push(FieldError { field: "recipient", reason });
    }
    if params.source_chain_id.is_empty() {
        errors.push(FieldError {
            field: "sourceChain",
            reason: "Source chain is required".to_string(),
        });
    }
    if params.destination_chain_id.is_empty() {
        errors.push(FieldError {
            field: "destinationChain",
            reason: "Destination chain is required".to_string(),
        });
    } else if params.destination_chain_id == params.source_chain_id {
        errors.push(FieldError {
            field: "destinationChain",
            reason: "Destination chain must be different from source chain".to_string(),
        });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        let valid = format!("0x{}", "a1B2".repeat(10));
        assert!(validate_address(&valid));
        assert!(!validate_address(&format!("0x{}", "a".repeat(39))));
        assert!(!validate_address(&format!("0x{}", "a".repeat(41))));
        assert!(!validate_address("not-an-address"));
        assert!(!validate_address(&format!("0x{}", "g".repeat(40))));
    }

    #[test]
    fn test_sanitize_strips_characters_and_protocols() {
        assert_eq!(sanitize_input("  <b>\"hi\" & 'bye'</b>  "), "bhi  bye/b");
        assert_eq!(sanitize_input("JavaScript:alert(1)"), "alert(1)");
        assert_eq!(sanitize_input("DATA:text/plain,x"), "text/plain,x");
        assert_eq!(sanitize_input("javajavascript:script:x"), "x");
        assert_eq!(sanitize_input("da<ta:x"), "x");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "hello world",
            "  <script>alert('x')</script> ",
            "jjavascript:avascript:data:DATA:",
            "a & b > c",
            " javascript: ",
            "",
        ];
        for input in inputs {
            let once = sanitize_input(input);
            assert_eq!(sanitize_input(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_validate_message() {
        let empty = validate_message("");
        assert!(!empty.is_valid);
        assert!(empty.error.is_some());

        assert!(!validate_message("   ").is_valid);
        assert!(!validate_message(&"a".repeat(1001)).is_valid);
        assert!(validate_message(&"a".repeat(1000)).is_valid);
        assert!(!validate_message("<script>alert(1)</script>").is_valid);
        assert!(!validate_message("<SCRIPT src=x>").is_valid);
        assert!(!validate_message("click VBScript:run").is_valid);
        assert!(!validate_message("<img onError=x>").is_valid);
        assert!(!validate_message("data:text/html;base64,xx").is_valid);
        assert!(validate_message("hello world").is_valid);
    }

    #[test]
    fn test_validate_chain_selection() {
        assert!(!validate_chain_selection("", "421614").is_valid);
        assert!(!validate_chain_selection("421614", "").is_valid);
        assert!(!validate_chain_selection("421614", "421614").is_valid);
        assert!(validate_chain_selection("11155111", "421614").is_valid);
    }

    #[test]
    fn test_into_result() {
        assert!(Validation::valid().into_result().is_ok());
        match validate_message("").into_result() {
            Err(Error::Validation(reason)) => assert_eq!(reason, "Message cannot be empty"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_form_reports_every_field() {
        let params = SendMessageParams {
            message: String::new(),
            source_chain_id: "421614".to_string(),
            destination_chain_id: "421614".to_string(),
            recipient: "0xnotvalid".to_string(),
        };
        let fields: Vec<_> = validate_form(&params).into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["message", "recipient", "destinationChain"]);

        let ok = SendMessageParams {
            message: "hello".to_string(),
            source_chain_id: "11155111".to_string(),
            destination_chain_id: "421614".to_string(),
            recipient: format!("0x{}", "0".repeat(40)),
        };
        assert!(validate_form(&ok).is_empty());
    }
}
