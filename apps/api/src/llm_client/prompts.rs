// Cross-cutting prompt fragments. Feature prompts live next to their service.

/// Appended to every system prompt whose reply is parsed as JSON.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Shared truthfulness rule for anything built from the user's profile.
pub const TRUTHFULNESS_INSTRUCTION: &str = "\
    Only use facts from the provided user profile. NEVER invent employers, \
    titles, dates, degrees, skills or metrics. If the profile does not support \
    a value, say so rather than guessing silently.";

/// Joins a feature prompt with the JSON-only rule.
pub fn json_system(base: &str) -> String {
    format!("{base}\n\n{JSON_ONLY_SYSTEM}")
}
