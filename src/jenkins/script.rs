//! Groovy scripts submitted to the script console, and parsing of their
//! output.

use std::collections::HashMap;

use secrecy::SecretString;

use crate::error::JenkinsError;

/// Prefix the generated scripts print in place of a plaintext when the
/// server-side decrypt fails.
pub const ERROR_SENTINEL: &str = "ERROR:";

/// Escape a value for use inside a Groovy single-quoted string literal.
pub fn groovy_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Quoted Groovy literal for a stored secret.
///
/// `Secret.decrypt` only reads the current format when the value is wrapped
/// in braces, as it is in `credentials.xml`. Bare ciphertexts are re-wrapped.
pub fn secret_literal(ciphertext: &str) -> String {
    if ciphertext.starts_with('{') && ciphertext.ends_with('}') && ciphertext.len() >= 2 {
        groovy_quote(ciphertext)
    } else {
        groovy_quote(&format!("{{{ciphertext}}}"))
    }
}

/// Script decrypting one ciphertext and printing the plaintext.
pub fn single_decrypt_script(ciphertext: &str) -> String {
    format!(
        "encrypted_pw = {}\n\
         passwd = hudson.util.Secret.decrypt(encrypted_pw)\n\
         println(passwd ?: '{ERROR_SENTINEL} secret could not be decrypted')\n",
        secret_literal(ciphertext)
    )
}

/// Script decrypting every item server side and printing one JSON object
/// keyed by identifier.
pub fn consolidated_decrypt_script<'a, I>(items: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut script = String::from("import groovy.json.JsonBuilder\n\ndef results = [:]\n\n");
    for (identifier, ciphertext) in items {
        let key = groovy_quote(identifier);
        script.push_str(&format!(
            "try {{\n    \
                 encrypted_pw = {ciphertext}\n    \
                 passwd = hudson.util.Secret.decrypt(encrypted_pw)\n    \
                 results[{key}] = passwd\n\
             }} catch (Exception e) {{\n    \
                 results[{key}] = '{ERROR_SENTINEL} ' + e.message\n\
             }}\n\n",
            ciphertext = secret_literal(ciphertext),
        ));
    }
    script.push_str("def json = new JsonBuilder(results)\nprintln json.toPrettyString()\n");
    script
}

/// Interpret the output of [`single_decrypt_script`].
pub fn parse_single_output(output: &str) -> Result<SecretString, JenkinsError> {
    let output = output.trim();
    if output.is_empty() {
        return Err(JenkinsError::empty_result());
    }
    if let Some(reason) = output.strip_prefix(ERROR_SENTINEL) {
        return Err(JenkinsError::script(format!(
            "Decryption failed: {}",
            reason.trim()
        )));
    }
    Ok(SecretString::from(output.to_string()))
}

/// Interpret the output of [`consolidated_decrypt_script`] for `identifiers`.
///
/// Identifiers whose value is missing, `null`, not a string, or begins with
/// the error sentinel map to a failure.
pub fn parse_consolidated_output<'a, I>(
    output: &str,
    identifiers: I,
) -> Result<HashMap<String, Result<SecretString, JenkinsError>>, JenkinsError>
where
    I: IntoIterator<Item = &'a str>,
{
    let value: serde_json::Value = serde_json::from_str(output.trim()).map_err(|e| {
        JenkinsError::script(format!("Failed to parse batch decryption output: {e}"))
    })?;
    let object = value.as_object().ok_or_else(|| {
        JenkinsError::script("Batch decryption output is not a JSON object")
    })?;

    let mut results = HashMap::new();
    for identifier in identifiers {
        let outcome = match object.get(identifier) {
            None => Err(JenkinsError::script(format!(
                "No result returned for '{identifier}'"
            ))),
            Some(serde_json::Value::Null) => Err(JenkinsError::script(format!(
                "Secret for '{identifier}' could not be decrypted"
            ))),
            Some(serde_json::Value::String(s)) => match s.strip_prefix(ERROR_SENTINEL) {
                Some(reason) => Err(JenkinsError::script(format!(
                    "Decryption failed: {}",
                    reason.trim()
                ))),
                None => Ok(SecretString::from(s.clone())),
            },
            Some(other) => Err(JenkinsError::script(format!(
                "Unexpected {} value for '{identifier}'",
                json_type(other)
            ))),
        };
        results.insert(identifier.to_string(), outcome);
    }
    Ok(results)
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use secrecy::ExposeSecret;

    #[test]
    fn quote_escapes_groovy_specials() {
        assert_eq!(groovy_quote("plain"), "'plain'");
        assert_eq!(groovy_quote("it's"), r"'it\'s'");
        assert_eq!(groovy_quote(r"a\b"), r"'a\\b'");
        assert_eq!(groovy_quote("a\r\nb"), r"'a\r\nb'");
    }

    #[test]
    fn secret_literal_restores_braces() {
        assert_eq!(secret_literal("AQAAABAAAAAQ"), "'{AQAAABAAAAAQ}'");
        assert_eq!(secret_literal("{AQAAABAAAAAQ}"), "'{AQAAABAAAAAQ}'");
        assert_eq!(secret_literal("{"), "'{{}'");
    }

    #[test]
    fn bare_ciphertext_is_wrapped_in_both_scripts() {
        let single = single_decrypt_script("AQAAABAAAAAQ");
        assert!(single.starts_with("encrypted_pw = '{AQAAABAAAAAQ}'\n"));
        let batch = consolidated_decrypt_script([("svc", "AQAAABAAAAAQ")]);
        assert!(batch.contains("encrypted_pw = '{AQAAABAAAAAQ}'"));
    }

    #[test]
    fn single_script_embeds_quoted_ciphertext() {
        let script = single_decrypt_script("{AQAAABAAAAAQ}");
        assert!(script.starts_with("encrypted_pw = '{AQAAABAAAAAQ}'\n"));
        assert!(script.contains("hudson.util.Secret.decrypt(encrypted_pw)"));
        assert!(script.contains("ERROR:"));
    }

    #[test]
    fn single_script_cannot_be_broken_out_of() {
        let script = single_decrypt_script("x'); System.exit(0); ('");
        assert!(script.contains(r"'{x\'); System.exit(0); (\'}'"));
    }

    #[test]
    fn consolidated_script_has_one_block_per_item() {
        let script =
            consolidated_decrypt_script([("alice", "{ENC1}"), ("o'brien", "{ENC2}")]);
        assert!(script.starts_with("import groovy.json.JsonBuilder\n"));
        assert!(script.contains("def results = [:]"));
        assert_eq!(script.matches("try {").count(), 2);
        assert_eq!(script.matches("catch (Exception e)").count(), 2);
        assert!(script.contains("results['alice'] = passwd"));
        assert!(script.contains(r"results['o\'brien'] = passwd"));
        assert!(script.contains("encrypted_pw = '{ENC2}'"));
        assert!(script.trim_end().ends_with("println json.toPrettyString()"));
    }

    #[test]
    fn parse_single_output_cases() {
        assert_eq!(
            parse_single_output("  hunter2\n").unwrap().expose_secret(),
            "hunter2"
        );
        let empty = parse_single_output("   ").unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::ScriptExecution);
        assert!(empty.is_retryable());
        let failed = parse_single_output("ERROR: bad padding").unwrap_err();
        assert_eq!(failed.kind(), ErrorKind::ScriptExecution);
        assert!(!failed.is_retryable());
        assert!(failed.message().contains("bad padding"));
    }

    #[test]
    fn parse_consolidated_mixed_output() {
        let output = r#"{"alice":"secret1","bob":"ERROR: boom"}"#;
        let results = parse_consolidated_output(output, ["alice", "bob"]).unwrap();
        assert_eq!(
            results["alice"].as_ref().unwrap().expose_secret(),
            "secret1"
        );
        let bob = results["bob"].as_ref().unwrap_err();
        assert!(bob.message().contains("boom"));
    }

    #[test]
    fn parse_consolidated_null_missing_and_non_string() {
        let output = r#"{
            "a": null,
            "b": 42
        }"#;
        let results = parse_consolidated_output(output, ["a", "b", "c"]).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.values().all(|r| r.is_err()));
        assert!(results["c"]
            .as_ref()
            .unwrap_err()
            .message()
            .contains("No result"));
    }

    #[test]
    fn parse_consolidated_rejects_non_object() {
        let err = parse_consolidated_output("not json", ["a"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScriptExecution);
        assert!(parse_consolidated_output("[1,2]", ["a"]).is_err());
    }
}
