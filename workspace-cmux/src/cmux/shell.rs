// Shell command construction for newly created runtime workspaces

use std::path::Path;

/// Build the `cd` command a new runtime workspace starts with
///
/// Paths under `home` are written as `"$HOME/..."` so the command is the same on
/// every machine; anything else is single-quoted verbatim.
pub fn cd_command(path: &Path, home: Option<&Path>) -> String {
    if let Some(home) = home.filter(|h| !h.as_os_str().is_empty()) {
        if let Ok(relative) = path.strip_prefix(home) {
            let relative = relative.to_string_lossy();
            if relative.is_empty() {
                return "cd \"$HOME\"".to_string();
            }
            return format!("cd \"$HOME/{}\"", escape_double_quoted(&relative));
        }
    }
    format!("cd {}", single_quote(&path.to_string_lossy()))
}

/// Quote for POSIX shells: `'...'` with embedded quotes as `'\''`
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
