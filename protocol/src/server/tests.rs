#[cfg(test)]
mod tests {
    use crate::{MessageKind, ParseError, PresenceKind, ServerMessage, parse_server_message};

    #[test]
    fn test_parse_join_ack() {
        let line = r#"{"event":"joined","userId":"abc123"}"#;
        let message = parse_server_message(line).unwrap();

        assert_eq!(
            message,
            ServerMessage::JoinAck {
                user_id: "abc123".into()
            }
        )
    }

    #[test]
    fn test_parse_join_ack_invalid() {
        let line = r#"{"event":"joined","userId":""}"#;
        let result = parse_server_message(line);

        assert!(matches!(result, Err(ParseError::MissingField(_))));
    }

    #[test]
    fn test_parse_message() {
        let line = r#"{"event":"message","id":"m1","senderId":"u1","senderName":"Alice","type":"text","text":"hi","timestamp":1700000000000}"#;

        match parse_server_message(line).unwrap() {
            ServerMessage::Message(msg) => {
                assert_eq!(msg.id, "m1");
                assert_eq!(msg.kind, MessageKind::Text);
                assert_eq!(msg.text.as_deref(), Some("hi"));
                assert_eq!(msg.timestamp, 1_700_000_000_000);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_typing() {
        let line = r#"{"event":"user-typing","userId":"u2","displayName":"Bob","isTyping":true,"text":"hel"}"#;
        let message = parse_server_message(line).unwrap();

        assert_eq!(
            message,
            ServerMessage::Typing {
                user_id: "u2".into(),
                display_name: "Bob".into(),
                is_typing: true,
                text: "hel".into(),
            }
        );
    }

    #[test]
    fn test_parse_system() {
        let line = r#"{"event":"system","text":"Bob joined the room.","userCount":2,"presence":"joined"}"#;
        let message = parse_server_message(line).unwrap();

        assert_eq!(
            message,
            ServerMessage::System {
                text: "Bob joined the room.".into(),
                user_count: Some(2),
                presence: PresenceKind::Joined,
            }
        );
    }

    #[test]
    fn test_parse_system_unknown_presence() {
        let line = r#"{"event":"system","text":"Room renamed","presence":"renamed"}"#;

        match parse_server_message(line).unwrap() {
            ServerMessage::System { presence, user_count, .. } => {
                assert_eq!(presence, PresenceKind::Other);
                assert_eq!(user_count, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown() {
        let line = r#"{"event":"someunknown","data":1}"#;
        let message = parse_server_message(line).unwrap();

        assert_eq!(message, ServerMessage::Raw(line.to_string()));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_server_message("not json"),
            Err(ParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_empty() {
        assert!(matches!(
            parse_server_message(""),
            Err(ParseError::EmptyMessage)
        ));
    }
}
