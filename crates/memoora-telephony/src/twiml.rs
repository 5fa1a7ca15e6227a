use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::error::Result;

/// Telephony markup returned to the provider from the prompt webhooks.
/// Only the verbs this service emits are modelled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    /// Text-to-speech fallback when no pre-rendered audio is cached.
    Say { voice: String, text: String },
    /// Pre-rendered prompt audio served from our temp-audio route.
    Play { url: String },
    /// Open the callee's recording window.
    Record {
        action: String,
        recording_callback: String,
        max_length_secs: u32,
        play_beep: bool,
        timeout_secs: u32,
    },
    Pause { length_secs: u32 },
    Redirect { url: String },
    Hangup,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, voice: &str, text: &str) -> Self {
        self.verbs.push(Verb::Say {
            voice: voice.to_string(),
            text: text.to_string(),
        });
        self
    }

    pub fn play(mut self, url: &str) -> Self {
        self.verbs.push(Verb::Play {
            url: url.to_string(),
        });
        self
    }

    pub fn record(
        mut self,
        action: &str,
        recording_callback: &str,
        max_length_secs: u32,
    ) -> Self {
        self.verbs.push(Verb::Record {
            action: action.to_string(),
            recording_callback: recording_callback.to_string(),
            max_length_secs,
            play_beep: true,
            timeout_secs: 5,
        });
        self
    }

    pub fn pause(mut self, length_secs: u32) -> Self {
        self.verbs.push(Verb::Pause { length_secs });
        self
    }

    pub fn redirect(mut self, url: &str) -> Self {
        self.verbs.push(Verb::Redirect {
            url: url.to_string(),
        });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = EventWriter::new_with_config(
            Vec::new(),
            EmitterConfig::new().write_document_declaration(true),
        );

        writer.write(XmlEvent::start_element("Response"))?;

        for verb in &self.verbs {
            match verb {
                Verb::Say { voice, text } => {
                    writer.write(XmlEvent::start_element("Say").attr("voice", voice))?;
                    writer.write(XmlEvent::characters(text))?;
                    writer.write(XmlEvent::end_element())?;
                }
                Verb::Play { url } => {
                    writer.write(XmlEvent::start_element("Play"))?;
                    writer.write(XmlEvent::characters(url))?;
                    writer.write(XmlEvent::end_element())?;
                }
                Verb::Record {
                    action,
                    recording_callback,
                    max_length_secs,
                    play_beep,
                    timeout_secs,
                } => {
                    let max_length = max_length_secs.to_string();
                    let beep = play_beep.to_string();
                    let timeout = timeout_secs.to_string();
                    writer.write(
                        XmlEvent::start_element("Record")
                            .attr("action", action)
                            .attr("method", "POST")
                            .attr("recordingStatusCallback", recording_callback)
                            .attr("recordingStatusCallbackMethod", "POST")
                            .attr("maxLength", &max_length)
                            .attr("playBeep", &beep)
                            .attr("timeout", &timeout),
                    )?;
                    writer.write(XmlEvent::end_element())?;
                }
                Verb::Pause { length_secs } => {
                    let length = length_secs.to_string();
                    writer.write(XmlEvent::start_element("Pause").attr("length", &length))?;
                    writer.write(XmlEvent::end_element())?;
                }
                Verb::Redirect { url } => {
                    writer.write(XmlEvent::start_element("Redirect").attr("method", "POST"))?;
                    writer.write(XmlEvent::characters(url))?;
                    writer.write(XmlEvent::end_element())?;
                }
                Verb::Hangup => {
                    writer.write(XmlEvent::start_element("Hangup"))?;
                    writer.write(XmlEvent::end_element())?;
                }
            }
        }

        writer.write(XmlEvent::end_element())?;
        Ok(String::from_utf8(writer.into_inner())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn say_and_record_render() {
        let xml = VoiceResponse::new()
            .say("alice", "Tell me about your childhood.")
            .record("https://x.example/voice-interactive", "https://x.example/handle-recording", 60)
            .to_xml()
            .unwrap();

        assert!(xml.contains("<Response>"));
        assert!(xml.contains(r#"<Say voice="alice">Tell me about your childhood.</Say>"#));
        assert!(xml.contains(r#"maxLength="60""#));
        assert!(xml.contains(r#"recordingStatusCallback="https://x.example/handle-recording""#));
        assert!(xml.contains(r#"action="https://x.example/voice-interactive""#));
    }

    #[test]
    fn play_takes_precedence_shape() {
        let xml = VoiceResponse::new()
            .play("https://x.example/audio/question_CA1_1.mp3")
            .record("https://x.example/voice-interactive", "https://x.example/handle-recording", 45)
            .to_xml()
            .unwrap();
        assert!(xml.contains("<Play>https://x.example/audio/question_CA1_1.mp3</Play>"));
    }

    #[test]
    fn characters_are_escaped() {
        let xml = VoiceResponse::new()
            .say("alice", "Ada & Grace <3")
            .to_xml()
            .unwrap();
        assert!(xml.contains("Ada &amp; Grace &lt;3"));
    }

    #[test]
    fn closing_ends_with_hangup() {
        let xml = VoiceResponse::new()
            .say("alice", "Thank you for sharing. Goodbye.")
            .hangup()
            .to_xml()
            .unwrap();
        assert!(xml.contains("<Hangup"));
        let hangup_pos = xml.find("Hangup").unwrap();
        let say_pos = xml.find("Say").unwrap();
        assert!(say_pos < hangup_pos);
    }

    #[test]
    fn pause_and_redirect_for_busy_turns() {
        let xml = VoiceResponse::new()
            .pause(2)
            .redirect("https://x.example/voice-interactive")
            .to_xml()
            .unwrap();
        assert!(xml.contains(r#"<Pause length="2""#));
        assert!(xml.contains("<Redirect"));
    }
}
