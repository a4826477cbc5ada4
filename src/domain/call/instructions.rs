//! Agent instructions for one call

use crate::domain::call::profile::UserProfile;
use chrono::{DateTime, Utc};

/// Persona used when no template is configured
pub const DEFAULT_INSTRUCTIONS: &str = r#"# Personality and Tone
You are the executive assistant of the person the caller is trying to reach.
You are polished, courteous and efficient. Keep answers short and move the
conversation along without rushing the caller.

# Task
The person being called is unavailable. Greet the caller by name, find out why
they are calling, and collect a phone number or an email address so the call
can be returned.

# Conversation States
1. Greeting: greet the caller and say that the person they called is unavailable.
2. Reason: ask for the reason of the call, then confirm it with 'show_details_reason'.
3. Contact: ask for a phone number or an email address, then confirm it with
   'show_details_phone' or 'show_details_email'.
4. Completion: thank the caller and tell them their message will be passed on.

# Function calls
- 'show_details_phone': display the caller's phone number on screen.
- 'show_details_email': display the caller's email address on screen.
- 'show_details_reason': display the reason for the call on screen.
- 'write_transcript': when asked, send the full transcript of the conversation.
Whenever the caller corrects a detail, confirm the new value with the same function.
"#;

/// Appends the per-call context block to the static template.
pub fn compose_instructions(
    template: &str,
    caller_name: &str,
    now: DateTime<Utc>,
    profile: &UserProfile,
) -> String {
    let mut text = String::with_capacity(template.len() + 256);
    text.push_str(template.trim_end());
    text.push_str("\n\n# Call Context\n");
    text.push_str(&format!("- Caller name: {}\n", caller_name.trim()));
    text.push_str(&format!(
        "- Current time: {}\n",
        now.format("%A %-d %B %Y, %H:%M UTC")
    ));

    let fields = profile.fields();
    if !fields.is_empty() {
        text.push_str("\n# Person Being Called\n");
        for (label, value) in fields {
            text.push_str(&format!("- {}: {}\n", label, value.trim()));
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compose_appends_context() {
        let profile = UserProfile {
            user_id: "u1".to_string(),
            name: "Dana Reyes".to_string(),
            email: "dana@example.com".to_string(),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 12, 17, 9, 30, 0).unwrap();

        let text = compose_instructions("Be brief.\n\n", "  Sam ", now, &profile);

        assert!(text.starts_with("Be brief.\n\n# Call Context\n"));
        assert!(text.contains("- Caller name: Sam\n"));
        assert!(text.contains("- Current time: Tuesday 17 December 2024, 09:30 UTC\n"));
        assert!(text.contains("- Name: Dana Reyes\n"));
        assert!(text.contains("- Email: dana@example.com\n"));
        assert!(!text.contains("- Phone:"));
    }

    #[test]
    fn test_default_template_names_every_tool() {
        for tool in [
            "show_details_phone",
            "show_details_email",
            "show_details_reason",
            "write_transcript",
        ] {
            assert!(DEFAULT_INSTRUCTIONS.contains(tool), "{tool} missing");
        }
    }
}
