//! Prompt templates for the completion service.

use crate::command::{CommandSpec, Example};

/// Renders examples as `User:` / `Response:` pairs.
pub fn format_examples(examples: &[Example]) -> String {
    examples
        .iter()
        .map(|example| {
            let response = serde_json::to_string(&example.response())
                .unwrap_or_else(|_| format!("{{\"command\": \"{}\"}}", example.command));
            format!("User: \"{}\"\nResponse: {}", example.utterance, response)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the system prompt used to turn a transcription into a command.
pub fn command_system_prompt(schemas: &[&CommandSpec], examples: &[Example]) -> String {
    let schema_json =
        serde_json::to_string_pretty(schemas).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are a voice command interpreter that precisely identifies commands and extracts parameters from transcribed speech.

AVAILABLE COMMANDS:
{schema_json}

YOUR TASK:
1. Analyze the transcribed text to determine which command the user wants to execute
2. Extract only the specific parameters defined for that command
3. Handle potential speech recognition errors gracefully
4. Return a clean JSON object with the command name and parameters

IMPORTANT GUIDELINES:
- If the user's intent matches one of the available commands, select that command
- Extract only parameters that are defined for the selected command
- If a parameter isn't mentioned, omit it from your response
- If the command is unclear or doesn't match any available commands, respond with {{"command": "unknown"}}
- Speech transcription may be imperfect; focus on the core intent rather than exact wording

COLOR HANDLING:
- When the user mentions changing the light color, set action to "color"
- Capture the color description as precisely as possible in the "color" parameter
- Examples of color descriptions: "blue", "warm white", "deep purple", "sunset orange"
- Keep the color description simple but accurate to help with color conversion

EXAMPLES:
{examples}

OUTPUT FORMAT:
{{"command": "command_name", "parameters": {{"param1": "value1", "param2": "value2"}}}}"#,
        examples = format_examples(examples),
    )
}

pub const COLOR_SYSTEM_PROMPT: &str = r#"You are a color interpretation assistant.
Your task is to convert natural language color descriptions into HSV color values for smart light bulbs.
Hue is in degrees (0-360), saturation and value are percentages (0-100).
Respond with ONLY a valid JSON object in this format:
{"hue": 240, "saturation": 100, "value": 100}"#;

pub fn color_user_prompt(description: &str) -> String {
    format!("Convert this color description to HSV values: {}", description)
}
