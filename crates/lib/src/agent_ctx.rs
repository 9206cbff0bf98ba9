//! System prompt loader: reads PROMPT.md from the configuration directory.
//!
//! The prompt describes the attendant persona and when to use each tool;
//! it is operator-editable, so it lives next to config.json instead of
//! being compiled in.

use std::fs;
use std::path::Path;

/// Load the system prompt from the config directory.
///
/// Returns the file contents when PROMPT.md exists and is non-empty;
/// otherwise None (the agent then runs without a system message).
pub fn load_system_prompt(config_dir: Option<&Path>) -> Option<String> {
    let dir = config_dir?;
    let path = dir.join("PROMPT.md");
    match fs::read_to_string(&path) {
        Ok(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dir_or_file_yields_none() {
        assert_eq!(load_system_prompt(None), None);
        let dir = std::env::temp_dir().join("catarina-test-no-prompt");
        let _ = std::fs::create_dir_all(&dir);
        assert_eq!(load_system_prompt(Some(&dir)), None);
    }

    #[test]
    fn prompt_file_contents_are_returned() {
        let dir = std::env::temp_dir().join("catarina-test-prompt");
        std::fs::create_dir_all(&dir).expect("temp dir");
        std::fs::write(dir.join("PROMPT.md"), "Você é a Catarina.").expect("write prompt");
        assert_eq!(
            load_system_prompt(Some(&dir)).as_deref(),
            Some("Você é a Catarina.")
        );
    }
}
