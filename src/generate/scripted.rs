//! Scripted demo generator.
//!
//! Replays a fixed tool-use workflow for weather questions about Dubai or
//! San Francisco, and a hint message for everything else. The inter-event
//! delay makes the streamed workflow visible to a human watching a client.

use std::time::Duration;

use futures::{StreamExt, stream};

use super::{EventStream, ResponseEvent, ResponseGenerator, TurnPrompt};

pub struct ScriptedGenerator {
    delay: Duration,
}

impl ScriptedGenerator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ResponseGenerator for ScriptedGenerator {
    fn respond(&self, prompt: &TurnPrompt) -> EventStream {
        let events = script_for(&prompt.message);
        let delay = self.delay;

        Box::pin(
            stream::iter(events.into_iter().enumerate()).then(move |(i, event)| async move {
                if i > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(event)
            }),
        )
    }
}

fn script_for(message: &str) -> Vec<ResponseEvent> {
    let lower = message.to_lowercase();

    if lower.contains("weather") && lower.contains("dubai") {
        weather_script(
            "Dubai",
            "sunny with a temperature of 35\u{b0}C (95\u{b0}F). The humidity is around 45% \
             and there's a light breeze from the northwest",
        )
    } else if lower.contains("weather") && lower.contains("san francisco") {
        weather_script(
            "San Francisco",
            "partly cloudy with a temperature of 18\u{b0}C (64\u{b0}F). The humidity is \
             around 70% and there's a moderate wind from the west",
        )
    } else {
        vec![ResponseEvent::Content {
            content: "I understand your request. For this demo, I'm simulating the computer \
                      use agent behavior. Try asking about the weather in Dubai or San \
                      Francisco to see the full workflow."
                .to_string(),
        }]
    }
}

fn weather_script(city: &str, report: &str) -> Vec<ResponseEvent> {
    vec![
        ResponseEvent::Content {
            content: format!(
                "I'll help you search for the weather in {city}. Let me open Firefox and \
                 search for this information."
            ),
        },
        ResponseEvent::ToolCall {
            tool_name: "open_firefox".to_string(),
            input: "Opening Firefox browser".to_string(),
        },
        ResponseEvent::ToolCall {
            tool_name: "navigate_to_google".to_string(),
            input: "Navigating to Google search".to_string(),
        },
        ResponseEvent::ToolCall {
            tool_name: "search_weather".to_string(),
            input: format!("Searching for weather in {city}"),
        },
        ResponseEvent::Content {
            content: format!("Based on my search, the current weather in {city} is {report}."),
        },
    ]
}
