//! Rendering of command results for chat delivery.
//!
//! Output is cut to [`MAX_OUTPUT_CHARS`] characters and wrapped in an HTML
//! `<pre>` block. Every piece of user or remote text is escaped first, so
//! nothing the remote host prints can be interpreted as markup. The visible
//! text of a reply never exceeds [`MAX_MESSAGE_CHARS`].

/// Maximum number of output characters shown for one command.
pub const MAX_OUTPUT_CHARS: usize = 4000;

/// Telegram's limit on message text after entity parsing.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Longest prompt or command echoed above the output.
pub const MAX_ECHO_CHARS: usize = 256;

const ECHO_ELLIPSIS: &str = "...";

/// Appended to output that was cut at [`MAX_OUTPUT_CHARS`].
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Shell-style prompt shown before the command, e.g. `alice@10.0.0.5:$ `.
pub fn prompt(username: &str, host: &str) -> String {
    format!("{}@{}:$ ", username, host)
}

/// Compose the reply for one executed command.
///
/// Produces `<pre>{prompt}{command}\n{output}</pre>` where output is
/// truncated to [`MAX_OUTPUT_CHARS`] characters with [`TRUNCATION_MARKER`].
/// Prompt and command are clipped to [`MAX_ECHO_CHARS`] each, and the output
/// is cut further when the whole text would not fit in [`MAX_MESSAGE_CHARS`].
pub fn format_command_result(prompt: &str, command: &str, output: &str) -> String {
    let prompt = clip_echo(prompt);
    let command = clip_echo(command);
    let header_chars = prompt.chars().count() + command.chars().count() + 1;

    let room = MAX_MESSAGE_CHARS.saturating_sub(header_chars);
    let output = if output.chars().count() <= room.min(MAX_OUTPUT_CHARS) {
        output.to_string()
    } else {
        let limit = room
            .saturating_sub(TRUNCATION_MARKER.chars().count())
            .min(MAX_OUTPUT_CHARS);
        truncate_to(output, limit)
    };

    format!(
        "<pre>{}{}\n{}</pre>",
        escape_html(&prompt),
        escape_html(&command),
        escape_html(&output)
    )
}

fn clip_echo(text: &str) -> String {
    match text.char_indices().nth(MAX_ECHO_CHARS) {
        Some(_) => {
            let keep = MAX_ECHO_CHARS - ECHO_ELLIPSIS.len();
            let cut = text
                .char_indices()
                .nth(keep)
                .map_or(text.len(), |(i, _)| i);
            format!("{}{}", &text[..cut], ECHO_ELLIPSIS)
        }
        None => text.to_string(),
    }
}

/// Inline `<code>` span for short user-supplied text.
pub fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

/// Cut `output` to [`MAX_OUTPUT_CHARS`] characters, never splitting a
/// character, and mark the cut.
pub fn truncate_output(output: &str) -> String {
    truncate_to(output, MAX_OUTPUT_CHARS)
}

fn truncate_to(output: &str, limit: usize) -> String {
    match output.char_indices().nth(limit) {
        Some((cut, _)) => {
            let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
            truncated.push_str(&output[..cut]);
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        }
        None => output.to_string(),
    }
}

/// Escape the characters Telegram's HTML parse mode interprets.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
