//! Built-in prompt templates

use crate::directive::PIPELINE_TOKEN;

/// Default system prompt: describes the assistant and the directive
/// protocol the first-pass filter relies on.
pub fn default_system_prompt() -> String {
    format!(
        r#"You are a professional, patient, knowledgeable and intelligent assistant.
Users will ask you questions, and you can answer them. If you don't know
the answer, it's okay to say you're not certain.

[About the tools library]
When replying you can respond normally. Only when you think a task
requires the external tools library should you activate your tools.
User messages are sent directly to you, but your replies go through a
filter that recognizes a hidden directive and activates the tools
library.

Always end your reply with a directive in this exact format:
[[TRUE][description of the tool action to perform]]
or, when no tool is needed:
[[FALSE][none]]

Example replies:
"Would you like the latest Tesla stock information? I can look that up. [[TRUE][Search for the latest Tesla stock information]]"
"I know the answer to your question, no need for a special search. [[FALSE][none]]"

[About the batch analysis pipeline]
Whenever the user's request is to run any part of the offline analysis
pipeline - loading data, imputing missing values, feature engineering,
training, evaluation, explanation, or final prediction - do not try to
answer directly. End your reply with exactly:
[[{token}][]]
and no other directive. This signals the system to invoke the full
seven-stage pipeline automatically."#,
        token = PIPELINE_TOKEN
    )
}

/// Summary request sent on the second completion pass, referencing the
/// tool result verbatim.
pub fn summary_prompt(user_message: &str, tool_result: &str) -> String {
    format!(
        r#"You have just used tools to accomplish a task for the user.
Here is the original request: "{user_message}"

The tools executed with the following result:
{tool_result}

Please provide a clear, concise, and helpful summary of:
1. What tools were used and why
2. What was accomplished
3. Key findings or insights from the tool execution
4. Any relevant next steps or recommendations

Format your response as a professional summary that focuses on the most important information."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_mentions_directive_format() {
        let prompt = default_system_prompt();
        assert!(prompt.contains("[[TRUE]["));
        assert!(prompt.contains("[[FALSE][none]]"));
        assert!(prompt.contains("[[PIPELINE][]]"));
    }

    #[test]
    fn test_summary_prompt_embeds_result_verbatim() {
        let prompt = summary_prompt("find X", "result-X\nwith lines");
        assert!(prompt.contains("\"find X\""));
        assert!(prompt.contains("result-X\nwith lines"));
    }
}
