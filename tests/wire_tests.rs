// Wire-format tests for the client/server control frames.
//
// The browser client and this service agree on camelCase data fields
// inside snake_case-tagged frames; these tests pin that contract.

use voxhire::audio::Codec;
use voxhire::transport::wire::{QuestionPayload, TranscriptPayload};
use voxhire::transport::{ClientFrame, ServerFrame, Speaker};

#[test]
fn test_meta_frame_deserialization() {
    let json = r#"{
        "type": "meta",
        "codec": "pcm16",
        "sampleRate": 16000,
        "language": "en",
        "candidateName": "Dana"
    }"#;

    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::Meta {
            codec,
            sample_rate,
            language,
            candidate_name,
            candidate_phone,
        } => {
            assert_eq!(codec, Codec::Pcm16);
            assert_eq!(sample_rate, 16000);
            assert_eq!(language, "en");
            assert_eq!(candidate_name.as_deref(), Some("Dana"));
            assert_eq!(candidate_phone, None);
        }
        other => panic!("expected meta frame, got {:?}", other),
    }
}

#[test]
fn test_meta_frame_compressed_codec() {
    let json = r#"{"type":"meta","codec":"webm_opus","sampleRate":48000,"language":"sv"}"#;

    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::Meta { codec, .. } => assert_eq!(codec, Codec::WebmOpus),
        other => panic!("expected meta frame, got {:?}", other),
    }
}

#[test]
fn test_flush_frame() {
    let frame: ClientFrame = serde_json::from_str(r#"{"type":"flush"}"#).unwrap();
    assert!(matches!(frame, ClientFrame::Flush));
}

#[test]
fn test_manual_text_frame() {
    let json = r#"{"type":"manual_text","text":"my mic is broken, typing instead"}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::ManualText { text } => {
            assert_eq!(text, "my mic is broken, typing instead")
        }
        other => panic!("expected manual_text frame, got {:?}", other),
    }
}

#[test]
fn test_control_frame_shutdown_default() {
    // A bare control frame carries no shutdown request.
    let frame: ClientFrame = serde_json::from_str(r#"{"type":"control"}"#).unwrap();
    match frame {
        ClientFrame::Control { shutdown_request } => assert!(!shutdown_request),
        other => panic!("expected control frame, got {:?}", other),
    }

    let frame: ClientFrame =
        serde_json::from_str(r#"{"type":"control","shutdown_request":true}"#).unwrap();
    match frame {
        ClientFrame::Control { shutdown_request } => assert!(shutdown_request),
        other => panic!("expected control frame, got {:?}", other),
    }
}

#[test]
fn test_question_frame_serialization() {
    let frame = ServerFrame::Question {
        data: QuestionPayload {
            question: "Tell me about a project you are proud of.".to_string(),
            is_greeting: None,
            is_closing: None,
            question_number: Some(2),
            total_questions: Some(6),
        },
    };

    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains("\"type\":\"question\""));
    assert!(json.contains("\"questionNumber\":2"));
    assert!(json.contains("\"totalQuestions\":6"));
    // Unset flags must not appear at all.
    assert!(!json.contains("isGreeting"));
    assert!(!json.contains("isClosing"));
}

#[test]
fn test_greeting_frame_flags() {
    let frame = ServerFrame::Question {
        data: QuestionPayload {
            question: "Hi Dana, thanks for joining!".to_string(),
            is_greeting: Some(true),
            is_closing: None,
            question_number: None,
            total_questions: None,
        },
    };

    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains("\"isGreeting\":true"));
    assert!(!json.contains("questionNumber"));
}

#[test]
fn test_transcript_frame_speaker_casing() {
    let frame = ServerFrame::Transcript {
        data: TranscriptPayload {
            text: "I led the migration to the new billing system.".to_string(),
            speaker: Speaker::Candidate,
            timestamp: "2026-08-26T10:00:00Z".parse().unwrap(),
        },
    };

    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains("\"speaker\":\"candidate\""));
    assert!(json.contains("\"type\":\"transcript\""));

    let back: ServerFrame = serde_json::from_str(&json).unwrap();
    match back {
        ServerFrame::Transcript { data } => assert_eq!(data.speaker, Speaker::Candidate),
        other => panic!("expected transcript frame, got {:?}", other),
    }
}

#[test]
fn test_interview_complete_frame() {
    let json = serde_json::to_string(&ServerFrame::InterviewComplete).unwrap();
    assert_eq!(json, r#"{"type":"interview_complete"}"#);
}

#[test]
fn test_ping_frame() {
    let json = serde_json::to_string(&ServerFrame::Ping { ts: 1724661600 }).unwrap();
    assert!(json.contains("\"type\":\"ping\""));
    assert!(json.contains("1724661600"));
}
