pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

/// Attribute values are written out verbatim by the serializer, so the constructors below
/// store them already escaped.  Text content is escaped on output.
mod twiml {
    use crate::consts::{GATHER_HINTS, GATHER_SPEECH_MODEL, GATHER_SPEECH_TIMEOUT};
    use crate::utils::escape_attr;
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize, Default, Debug)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    impl Response {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, action: ResponseAction) -> &mut Self {
            self.actions.push(action);
            self
        }

        /// Serialize to a complete TwiML document.
        pub fn render(self) -> String {
            super::wrap_twiml(xmlserde::xml_serialize(self))
        }
    }

    #[derive(PartialEq, Eq, XmlSerialize, Debug)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Gather")]
        Gather(GatherAction),
        #[xmlserde(name = b"Redirect")]
        Redirect(RedirectAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default, Debug)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"loop", ty = "attr")]
        pub lp: Option<u16>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    impl SayAction {
        pub fn new(text: impl Into<String>, voice: Option<&str>) -> Self {
            Self {
                text: text.into(),
                voice: voice.map(escape_attr),
                ..Default::default()
            }
        }
    }

    /// Speech-input collection.  Nested prompts are spoken while Twilio listens.
    #[derive(PartialEq, Eq, XmlSerialize, Default, Debug)]
    pub struct GatherAction {
        #[xmlserde(name = b"input", ty = "attr")]
        pub input: Option<String>,
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
        #[xmlserde(name = b"speechTimeout", ty = "attr")]
        pub speech_timeout: Option<String>,
        #[xmlserde(name = b"speechModel", ty = "attr")]
        pub speech_model: Option<String>,
        #[xmlserde(name = b"hints", ty = "attr")]
        pub hints: Option<String>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
        #[xmlserde(ty = "untag")]
        pub prompts: Vec<GatherPrompt>,
    }

    impl GatherAction {
        /// Speech gather posting back to `action`, prompting with `say`.
        pub fn speech(action: &str, say: SayAction) -> Self {
            Self {
                input: Some("speech".to_string()),
                action: Some(escape_attr(action)),
                method: Some("POST".to_string()),
                speech_timeout: Some(GATHER_SPEECH_TIMEOUT.to_string()),
                speech_model: Some(GATHER_SPEECH_MODEL.to_string()),
                hints: Some(escape_attr(GATHER_HINTS)),
                language: None,
                prompts: vec![GatherPrompt::Say(say)],
            }
        }
    }

    #[derive(PartialEq, Eq, XmlSerialize, Debug)]
    pub enum GatherPrompt {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default, Debug)]
    pub struct RedirectAction {
        #[xmlserde(ty = "text")]
        pub url: String,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
    }

    impl RedirectAction {
        pub fn post(url: &str) -> Self {
            Self {
                url: url.to_string(),
                method: Some("POST".to_string()),
            }
        }
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default, Debug)]
    pub struct HangupAction {}
}
pub use twiml::*;

mod webhook {
    use serde::Deserialize;

    /// Form fields Twilio posts to the voice webhook and to `<Gather action>`.  Every field is
    /// optional so a short or odd payload still gets a TwiML answer.
    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct TwilioVoicePayload {
        #[serde(default)]
        pub account_sid: Option<String>,
        #[serde(default)]
        pub call_sid: Option<String>,
        #[serde(default)]
        pub call_status: Option<String>,
        #[serde(default)]
        pub from: Option<String>,
        #[serde(default)]
        pub to: Option<String>,
        #[serde(default)]
        pub speech_result: Option<String>,
        #[serde(default)]
        pub confidence: Option<String>,
    }
}
pub use webhook::*;

mod rest {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct AvailablePhoneNumberList {
        #[serde(default)]
        pub available_phone_numbers: Vec<AvailablePhoneNumber>,
    }

    #[allow(dead_code)]
    #[derive(Deserialize, Debug)]
    pub struct AvailablePhoneNumber {
        pub phone_number: String,
        #[serde(default)]
        pub friendly_name: Option<String>,
        #[serde(default)]
        pub iso_country: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct IncomingPhoneNumber {
        #[serde(default)]
        pub sid: String,
        pub phone_number: String,
    }
}
pub use rest::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_gather_with_nested_say_and_redirect() {
        let mut response = Response::new();
        response
            .push(ResponseAction::Gather(GatherAction::speech(
                "/inbound-agent",
                SayAction::new("Which country are you visiting?", None),
            )))
            .push(ResponseAction::Redirect(RedirectAction::post(
                "/inbound-agent",
            )));
        let twiml = response.render();

        assert!(twiml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>"));
        assert!(twiml.contains("input=\"speech\""));
        assert!(twiml.contains("speechTimeout=\"2\""));
        assert!(twiml.contains("speechModel=\"googlev2_long\""));
        assert!(twiml.contains("<Say>Which country are you visiting?</Say>"));
        assert!(twiml.contains(">/inbound-agent</Redirect>"));
        let gather = twiml.find("<Gather").unwrap();
        let say = twiml.find("<Say").unwrap();
        let redirect = twiml.find("<Redirect").unwrap();
        assert!(gather < say && say < redirect);
    }

    #[test]
    fn renders_say_voice_and_hangup() {
        let mut response = Response::new();
        response
            .push(ResponseAction::Say(SayAction::new("Goodbye!", Some("alice"))))
            .push(ResponseAction::Hangup(HangupAction::default()));
        let twiml = response.render();

        assert!(twiml.contains("voice=\"alice\""));
        assert!(twiml.contains("Goodbye!</Say>"));
        assert!(twiml.contains("<Hangup"));
        assert!(!twiml.contains("<Gather"));
    }

    #[test]
    fn attribute_values_are_escaped() {
        let mut response = Response::new();
        response
            .push(ResponseAction::Gather(GatherAction::speech(
                "https://a.example.com/?a=1&b=2",
                SayAction::new("H-1B & F-1", Some("Polly.\"x\"")),
            )))
            .push(ResponseAction::Redirect(RedirectAction::post(
                "https://a.example.com/?a=1&b=2",
            )));
        let twiml = response.render();

        assert!(twiml.contains("action=\"https://a.example.com/?a=1&amp;b=2\""));
        assert!(twiml.contains("voice=\"Polly.&quot;x&quot;\""));
        assert!(twiml.contains(">https://a.example.com/?a=1&amp;b=2</Redirect>"));
        assert!(!twiml.contains("&b=2"));
    }

    #[test]
    fn parses_gather_callback_form() {
        let body = "AccountSid=AC123&CallSid=CA42&CallStatus=in-progress\
                    &SpeechResult=I+am+from+India&Confidence=0.91";
        let payload = serde_urlencoded::from_str::<TwilioVoicePayload>(body).unwrap();
        assert_eq!(payload.call_sid.as_deref(), Some("CA42"));
        assert_eq!(payload.speech_result.as_deref(), Some("I am from India"));
        assert_eq!(payload.call_status.as_deref(), Some("in-progress"));
    }

    #[test]
    fn empty_speech_result_is_kept_distinct_from_missing() {
        let payload = serde_urlencoded::from_str::<TwilioVoicePayload>("CallSid=CA1&SpeechResult=")
            .unwrap();
        assert_eq!(payload.speech_result.as_deref(), Some(""));

        let payload = serde_urlencoded::from_str::<TwilioVoicePayload>("CallSid=CA1").unwrap();
        assert_eq!(payload.speech_result, None);
    }
}
