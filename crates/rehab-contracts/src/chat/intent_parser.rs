use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, EXPORT_COMMAND, FACE_ID_COMMANDS, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
    THEME_COMMAND, TITLE_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

/// Titles may be quoted; surrounding quotes are stripped, inner spacing kept.
fn parse_title_arg(arg: &str) -> String {
    let trimmed = arg.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return Intent::new("unknown", text)
            .with_arg("arg", Value::String(raw_trimmed.to_string()));
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
        return Intent::new(action, text)
            .with_arg("path", Value::String(parse_single_path_arg(arg)));
    }

    if let Some(action) = find_action(&command, TITLE_COMMANDS) {
        return Intent::new(action, text).with_arg("title", Value::String(parse_title_arg(arg)));
    }

    if let Some(action) = find_action(&command, FACE_ID_COMMANDS) {
        let id = arg
            .parse::<u32>()
            .ok()
            .filter(|value| *value >= 1)
            .map(Value::from)
            .unwrap_or(Value::Null);
        return Intent::new(action, text).with_arg("id", id);
    }

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return Intent::new(action, text);
    }

    if command == THEME_COMMAND.command {
        let theme = if arg.is_empty() {
            Value::Null
        } else {
            Value::String(arg.to_ascii_lowercase())
        };
        return Intent::new(THEME_COMMAND.action, text).with_arg("theme", theme);
    }

    if command == EXPORT_COMMAND.command {
        let path = parse_single_path_arg(arg);
        let path = if path.is_empty() {
            Value::Null
        } else {
            Value::String(path)
        };
        return Intent::new(EXPORT_COMMAND.action, text).with_arg("path", path);
    }

    Intent::new("unknown", text)
        .with_arg("command", Value::String(command))
        .with_arg("arg", Value::String(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::parse_intent;

    #[test]
    fn parse_upload_quoted_path() {
        let intent = parse_intent("/upload \"/tmp/old family.jpg\"");
        assert_eq!(intent.action, "upload");
        assert_eq!(intent.command_args["path"], json!("/tmp/old family.jpg"));
    }

    #[test]
    fn parse_title_commands() {
        let restore = parse_intent("/restore Comprehensive Restoration");
        assert_eq!(restore.action, "restore");
        assert_eq!(restore.command_args["title"], json!("Comprehensive Restoration"));

        let iterate = parse_intent("  /iterate \"Vibrant & Modern Remaster\" ");
        assert_eq!(iterate.action, "iterate");
        assert_eq!(iterate.command_args["title"], json!("Vibrant & Modern Remaster"));

        let by_index = parse_intent("/restore 3");
        assert_eq!(by_index.command_args["title"], json!("3"));
    }

    #[test]
    fn parse_regen_face_id() {
        assert_eq!(parse_intent("/regen 2").command_args["id"], json!(2));
        assert_eq!(parse_intent("/regen 0").command_args["id"], Value::Null);
        assert_eq!(parse_intent("/regen two").command_args["id"], Value::Null);
        assert_eq!(parse_intent("/regen 2").action, "regenerate_face");
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/all").action, "generate_all");
        assert_eq!(parse_intent("/faces").action, "face_closeups");
        assert_eq!(parse_intent("/transplant").action, "transplant");
        assert_eq!(
            parse_intent("/iterate_transplant").action,
            "iterate_transplant"
        );
        assert_eq!(parse_intent("/SAVE").action, "save");
        assert_eq!(parse_intent("/test_mode").action, "toggle_test_mode");
    }

    #[test]
    fn parse_theme_and_export_optional_args() {
        assert_eq!(parse_intent("/theme").command_args["theme"], Value::Null);
        assert_eq!(parse_intent("/theme Light").command_args["theme"], json!("light"));
        assert_eq!(parse_intent("/export").command_args["path"], Value::Null);
        assert_eq!(
            parse_intent("/export out/gallery.zip").command_args["path"],
            json!("out/gallery.zip")
        );
    }

    #[test]
    fn parse_blank_and_plain_text() {
        assert_eq!(parse_intent("   ").action, "noop");
        let plain = parse_intent("make it pretty");
        assert_eq!(plain.action, "unknown");
        assert_eq!(plain.command_args["arg"], json!("make it pretty"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
