use once_cell::sync::Lazy;
use regex::Regex;

use crate::pack::PackService;

// `git-upload-pack '/path'`, `git upload-pack '/path'` or `upload-pack '/path'`
static PACK_COMMAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:git[- ])?(upload-pack|receive-pack) '([^']+)'$")
        .unwrap_or_else(|e| unreachable!("invalid pack command pattern: {e}"))
});

/// A validated SSH exec command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackCommand {
    pub service: PackService,
    pub path: String,
}

impl PackCommand {
    pub fn parse(command: &str) -> Option<Self> {
        let captures = PACK_COMMAND_RE.captures(command.trim_end_matches(['\n', '\0']))?;
        let service = PackService::from_subcommand(captures.get(1)?.as_str())?;
        let path = captures.get(2)?.as_str().to_string();
        Some(PackCommand { service, path })
    }
}
