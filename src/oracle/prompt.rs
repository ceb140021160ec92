// Oracle prompt construction

use serde_json::{json, Value};

use super::{Challenge, SelectedSpice};

pub const SYSTEM_INSTRUCTION: &str = "You are 'The Oracle of Flavors,' an ancient, wise, and poetic connoisseur of Indian cuisine. You speak with grandeur and authority. Your purpose is to judge culinary creations submitted to you. Always respond with a JSON object that matches the provided schema.";

pub fn judgement_prompt(challenge: &Challenge, spices: &[SelectedSpice]) -> String {
    let spice_list = spices
        .iter()
        .map(|s| format!("- {}: {} part(s)", s.name, s.quantity))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "A new culinary creation has been brought before you.\n\
         The dish is based on the concept: '{} - {}'.\n\
         The base ingredients are: '{}'.\n\
         \n\
         The creator has used the following divine spices:\n\
         {}\n\
         \n\
         Based on this combination, please provide your divine judgment. Be creative, dramatic, and insightful. The dishName should be unique and sound legendary.",
        challenge.title, challenge.description, challenge.base, spice_list
    )
}

/// Response schema the model must follow
pub fn judgement_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "dishName": {
                "type": "STRING",
                "description": "A creative, evocative name for the dish based on its ingredients and concept."
            },
            "description": {
                "type": "STRING",
                "description": "A poetic and vivid description of the dish's flavor profile and aroma, as if you are tasting it."
            },
            "score": {
                "type": "NUMBER",
                "description": "A numerical score out of 10 (e.g., 8.5) based on the balance and suitability of the spices for the dish concept."
            },
            "feedback": {
                "type": "STRING",
                "description": "Constructive feedback on how the dish could be improved or what makes it exceptional. Be specific about the spice interactions."
            }
        },
        "required": ["dishName", "description", "score", "feedback"]
    })
}
