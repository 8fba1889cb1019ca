//! Coaching prompt rendering.

use super::base::GenerationRequest;

pub const SYSTEM_PROMPT: &str = "You are an expert personal trainer and nutritionist. \
You give practical, safe and motivating advice adapted to each person's level and goals. \
Keep answers short enough to be spoken aloud.";

/// Render the user turn for a chat completion
pub fn render_user_prompt(request: &GenerationRequest) -> String {
    let history = if request.conversation_history.trim().is_empty() {
        "(no previous messages)"
    } else {
        request.conversation_history.as_str()
    };

    format!(
        "User context: {context}\n\
         Training history: {training}\n\
         Conversation so far:\n{history}\n\n\
         Question: {question}\n\n\
         Answer in the language with code \"{language}\". Your answer should:\n\
         1. Be specific and personalized\n\
         2. Consider the user's fitness level and goals\n\
         3. Include safety recommendations when relevant\n\
         4. Be motivating and positive",
        context = request.user_context,
        training = request.training_history,
        question = request.user_input,
        language = request.language,
    )
}
