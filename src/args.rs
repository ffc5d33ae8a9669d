//! Command-line construction for the sc binary, and credential redaction
//! for anything that gets logged.

use regex::Regex;

use crate::config::Config;

/// Fixed placeholder substituted for UUID-shaped tokens in logged
/// command lines.
const UUID_PLACEHOLDER: &str = "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXX";

/// Build the ordered argument list for the sc process.
///
/// The supervisor appends the `--readyfile` pair itself; everything else
/// comes from here.
pub fn build_args(config: &Config) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(username) = &config.username {
        args.push("-u".to_string());
        args.push(username.clone());
    }
    if let Some(access_key) = &config.access_key {
        args.push("-k".to_string());
        args.push(access_key.clone());
    }
    if config.verbose {
        args.push("-v".to_string());
    }

    args.extend(config.extra_args.iter().cloned());
    args
}

/// Mask credentials in a command line before it is surfaced in logs.
///
/// The values of `-u` and `-k` are replaced with `XXXXXXXX`, and any
/// remaining UUID-shaped token with a fixed placeholder. Only logged
/// command lines are redacted; raw sc output is surfaced as-is.
pub fn redact(cmdline: &str) -> String {
    let flag_value =
        Regex::new(r"-([uk]) \S+").expect("credential flag pattern is valid");
    let redacted = flag_value.replace_all(cmdline, "-$1 XXXXXXXX");

    let uuid = Regex::new(r"(?i)[0-9a-f]{8}-(?:[0-9a-f]{4}-){3}[0-9a-f]{12}")
        .expect("uuid pattern is valid");
    uuid.replace_all(&redacted, UUID_PLACEHOLDER).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_credentials() {
        let config = Config {
            username: Some("john".into()),
            access_key: Some("s3cr3t".into()),
            verbose: true,
            ..Default::default()
        };
        assert_eq!(build_args(&config), vec!["-u", "john", "-k", "s3cr3t", "-v"]);
    }

    #[test]
    fn test_build_args_extra_passthrough() {
        let config = Config {
            extra_args: vec!["--se-port".into(), "4446".into()],
            ..Default::default()
        };
        assert_eq!(build_args(&config), vec!["--se-port", "4446"]);
    }

    #[test]
    fn test_redact_credentials_and_uuid() {
        let line = "-u realuser -k 11111111-1111-1111-1111-111111111111";
        assert_eq!(redact(line), "-u XXXXXXXX -k XXXXXXXX");
    }

    #[test]
    fn test_redact_bare_uuid() {
        let line = "token 22222222-2222-2222-2222-222222222222 trailing";
        assert_eq!(
            redact(line),
            format!("token {} trailing", UUID_PLACEHOLDER)
        );
    }

    #[test]
    fn test_redact_leaves_plain_args_alone() {
        let line = "-v --se-port 4446";
        assert_eq!(redact(line), line);
    }
}
