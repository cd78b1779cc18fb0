use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use parley::core::{Channel, Meeting, MessageRecord, MessageStatus, RoomEvent, Session, SessionManager};
use parley::storage::TranscriptStore;

fn directory() -> Arc<SessionManager> {
    Arc::new(SessionManager::new())
}

fn connect(dir: &Arc<SessionManager>, owner: &str) -> (String, UnboundedReceiver<RoomEvent>) {
    let (session, rx) = Session::new(owner);
    let id = session.id.clone();
    dir.register(session);
    (id, rx)
}

fn drain(rx: &mut UnboundedReceiver<RoomEvent>) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn recv_messages(events: &[RoomEvent]) -> Vec<MessageRecord> {
    events
        .iter()
        .filter_map(|e| match e {
            RoomEvent::RecvMessage { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn message(channel: Channel, creator: &str, sender_session: &str) -> MessageRecord {
    let mut msg = MessageRecord::new(channel, json!({"text": "hi"}));
    msg.creator = creator.to_string();
    msg.sender_session = Some(sender_session.to_string());
    msg
}

fn names(values: &[&str]) -> HashSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_default_message_broadcasts_to_all_occupants() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");
    let (carol, mut carol_rx) = connect(&dir, "carol");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![alice.clone(), bob.clone(), carol.clone()]);
    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        drain(rx);
    }

    let handled = meeting.post_message(message(Channel::Default, "alice", &alice), &mut transcripts);
    assert!(handled);
    assert_eq!(meeting.message_count(), 1);

    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        let received = recv_messages(&drain(rx));
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].status, MessageStatus::Posted);
        assert_eq!(received[0].container_id.as_deref(), Some(meeting.id()));
        // the transient sender session never leaves the routing pass
        assert!(received[0].sender_session.is_none());
    }

    // transcript completeness: exactly the shared-with identities hold a copy
    let room_log = transcripts.room_transcript(meeting.id()).unwrap();
    assert_eq!(room_log.len(), 1);
    let stored = room_log.messages()[0].clone();
    assert_eq!(stored.shared_with, names(&["alice", "bob", "carol"]));
    for user in ["alice", "bob", "carol"] {
        assert!(transcripts
            .user_transcript(user, meeting.id())
            .unwrap()
            .contains(stored.id.as_deref().unwrap()));
    }
    assert!(transcripts.user_transcript("dave", meeting.id()).is_none());
}

#[test]
fn test_targeted_whisper_skips_other_occupants() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");
    let (carol, mut carol_rx) = connect(&dir, "carol");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![alice.clone(), bob.clone(), carol.clone()]);
    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        drain(rx);
    }

    let mut msg = message(Channel::Whisper, "alice", &alice);
    msg.recipients = names(&["bob"]);
    assert!(meeting.post_message(msg, &mut transcripts));

    // targeted delivery does not count as a room broadcast
    assert_eq!(meeting.message_count(), 0);
    assert_eq!(recv_messages(&drain(&mut alice_rx)).len(), 1);
    assert_eq!(recv_messages(&drain(&mut bob_rx)).len(), 1);
    assert!(recv_messages(&drain(&mut carol_rx)).is_empty());
    assert!(transcripts.user_transcript("carol", meeting.id()).is_none());
}

#[test]
fn test_whisper_to_self_is_dropped_without_transcripts() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![alice.clone(), bob.clone()]);
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let mut msg = message(Channel::Whisper, "alice", &alice);
    msg.recipients = names(&["alice"]);
    assert!(!meeting.post_message(msg, &mut transcripts));

    assert!(recv_messages(&drain(&mut alice_rx)).is_empty());
    assert!(recv_messages(&drain(&mut bob_rx)).is_empty());
    assert!(transcripts.room_transcript(meeting.id()).is_none());
    assert!(transcripts.user_transcript("alice", meeting.id()).is_none());
    assert!(transcripts.drain_outbox().is_empty());
}

#[test]
fn test_unsupported_channels_dropped_in_open_room() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupant(&alice, false);
    drain(&mut alice_rx);

    for channel in [Channel::Content, Channel::Poll, Channel::Meta] {
        assert!(!meeting.post_message(message(channel, "alice", &alice), &mut transcripts));
    }
    let mut unknown = message(Channel::Default, "alice", &alice);
    unknown.channel = "BROADCAST".to_string();
    assert!(!meeting.post_message(unknown, &mut transcripts));
    assert!(recv_messages(&drain(&mut alice_rx)).is_empty());
}

#[test]
fn test_bulk_add_emits_single_entered_room_event() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");
    let (carol, mut carol_rx) = connect(&dir, "carol");

    let mut meeting = Meeting::new(dir.clone(), None);
    let added = meeting.add_occupants(vec![alice, bob, carol]);
    assert_eq!(added, 3);

    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        let events = drain(rx);
        assert_eq!(events.len(), 1, "exactly one event per new occupant");
        match &events[0] {
            RoomEvent::EnteredRoom { room } => {
                assert_eq!(room.occupants, vec!["alice", "bob", "carol"]);
            }
            other => panic!("expected EnteredRoom, got {:?}", other),
        }
    }
}

#[test]
fn test_single_add_notifies_existing_occupants() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    meeting.add_occupant(&alice, true);
    drain(&mut alice_rx);
    meeting.add_occupant(&bob, true);

    let alice_events = drain(&mut alice_rx);
    assert!(matches!(alice_events[0], RoomEvent::RoomMembershipChanged { .. }));
    let bob_events = drain(&mut bob_rx);
    assert!(matches!(bob_events[0], RoomEvent::EnteredRoom { .. }));
}

#[test]
fn test_remove_occupant_notifies_both_sides() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");
    let mut meeting = Meeting::new(dir.clone(), None);
    meeting.add_occupants(vec![alice.clone(), bob.clone()]);
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    assert!(meeting.remove_occupant(&bob));
    assert!(matches!(drain(&mut bob_rx)[0], RoomEvent::ExitedRoom { .. }));
    assert!(matches!(
        drain(&mut alice_rx)[0],
        RoomEvent::RoomMembershipChanged { .. }
    ));
}

#[test]
fn test_moderation_toggle_emits_once() {
    let dir = directory();
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let mut meeting = Meeting::new(dir.clone(), None);
    meeting.add_occupant(&alice, false);
    drain(&mut alice_rx);

    assert!(meeting.set_moderated(true));
    assert!(!meeting.set_moderated(true));
    let events = drain(&mut alice_rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        RoomEvent::RoomModerationChanged { room } => assert!(room.moderated),
        other => panic!("expected RoomModerationChanged, got {:?}", other),
    }
}

#[test]
fn test_moderation_queue_round_trip() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone(), bob.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    for rx in [&mut mod_rx, &mut alice_rx, &mut bob_rx] {
        drain(rx);
    }

    assert!(meeting.post_message(message(Channel::Default, "alice", &alice), &mut transcripts));
    assert_eq!(meeting.pending_count(), 1);
    assert!(recv_messages(&drain(&mut alice_rx)).is_empty());
    assert!(recv_messages(&drain(&mut bob_rx)).is_empty());
    assert!(transcripts.room_transcript(meeting.id()).is_none());

    let mod_events = drain(&mut mod_rx);
    let pending_id = match &mod_events[0] {
        RoomEvent::RecvMessageForModeration { message } => {
            assert_eq!(message.status, MessageStatus::Pending);
            message.id.clone().unwrap()
        }
        other => panic!("expected RecvMessageForModeration, got {:?}", other),
    };

    // approving an unknown id is a no-op
    assert!(!meeting.approve_message("no-such-message", &mut transcripts));
    assert_eq!(meeting.pending_count(), 1);

    assert!(meeting.approve_message(&pending_id, &mut transcripts));
    assert_eq!(meeting.pending_count(), 0);
    assert_eq!(meeting.message_count(), 1);
    for rx in [&mut mod_rx, &mut alice_rx, &mut bob_rx] {
        let received = recv_messages(&drain(rx));
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].status, MessageStatus::Posted);
    }
    assert!(transcripts
        .user_transcript("bob", meeting.id())
        .unwrap()
        .contains(&pending_id));
}

#[test]
fn test_moderator_bypasses_approval_queue() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    drain(&mut mod_rx);
    drain(&mut alice_rx);

    assert!(meeting.post_message(
        message(Channel::Default, "mod", &moderator),
        &mut transcripts
    ));
    assert_eq!(meeting.pending_count(), 0);
    assert_eq!(recv_messages(&drain(&mut alice_rx)).len(), 1);
}

#[test]
fn test_peer_whisper_is_not_redirected() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone(), bob.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    for rx in [&mut mod_rx, &mut alice_rx, &mut bob_rx] {
        drain(rx);
    }

    let mut msg = message(Channel::Whisper, "alice", &alice);
    msg.recipients = names(&["bob"]);
    assert!(meeting.post_message(msg, &mut transcripts));

    assert_eq!(meeting.pending_count(), 0);
    assert_eq!(recv_messages(&drain(&mut alice_rx)).len(), 1);
    assert_eq!(recv_messages(&drain(&mut bob_rx)).len(), 1);
    assert!(recv_messages(&drain(&mut mod_rx)).is_empty());
}

#[test]
fn test_mass_whisper_goes_through_moderation() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone(), bob.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    for rx in [&mut mod_rx, &mut alice_rx, &mut bob_rx] {
        drain(rx);
    }

    // two non-sender recipients covering the whole room: held for approval
    let mut msg = message(Channel::Whisper, "alice", &alice);
    msg.recipients = names(&["bob", "mod"]);
    assert!(meeting.post_message(msg, &mut transcripts));
    assert_eq!(meeting.pending_count(), 1);
    assert!(recv_messages(&drain(&mut bob_rx)).is_empty());
    assert!(matches!(
        drain(&mut mod_rx)[0],
        RoomEvent::RecvMessageForModeration { .. }
    ));
}

#[test]
fn test_partial_mass_whisper_is_dropped_not_redirected() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, _alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");
    let (carol, _carol_rx) = connect(&dir, "carol");
    let (dave, _dave_rx) = connect(&dir, "dave");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![
        moderator.clone(),
        alice.clone(),
        bob.clone(),
        carol,
        dave,
    ]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    drain(&mut mod_rx);
    drain(&mut bob_rx);

    // more than one recipient but not the whole room: neither queued nor routed
    let mut msg = message(Channel::Whisper, "alice", &alice);
    msg.recipients = names(&["bob", "carol"]);
    assert!(!meeting.post_message(msg, &mut transcripts));
    assert_eq!(meeting.pending_count(), 0);
    assert!(recv_messages(&drain(&mut bob_rx)).is_empty());
}

#[test]
fn test_whisper_to_moderators_is_permitted() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (second_mod, mut second_rx) = connect(&dir, "mod2");
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![
        moderator.clone(),
        second_mod.clone(),
        alice.clone(),
        bob.clone(),
    ]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    meeting.add_moderator(&second_mod);
    for rx in [&mut mod_rx, &mut second_rx, &mut alice_rx, &mut bob_rx] {
        drain(rx);
    }

    let mut msg = message(Channel::Whisper, "alice", &alice);
    msg.recipients = names(&["mod", "mod2"]);
    assert!(meeting.post_message(msg, &mut transcripts));
    assert_eq!(meeting.pending_count(), 0);
    assert_eq!(recv_messages(&drain(&mut mod_rx)).len(), 1);
    assert_eq!(recv_messages(&drain(&mut second_rx)).len(), 1);
    assert!(recv_messages(&drain(&mut bob_rx)).is_empty());
}

#[test]
fn test_shadowed_whisper_is_copied_to_moderators() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone(), bob.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    meeting.shadow_identity("alice");
    for rx in [&mut mod_rx, &mut alice_rx, &mut bob_rx] {
        drain(rx);
    }

    let mut msg = message(Channel::Whisper, "alice", &alice);
    msg.recipients = names(&["bob"]);
    assert!(meeting.post_message(msg, &mut transcripts));

    let mod_events = drain(&mut mod_rx);
    let shadowed = match &mod_events[0] {
        RoomEvent::RecvMessageForShadow { message } => message.clone(),
        other => panic!("expected RecvMessageForShadow, got {:?}", other),
    };
    assert_eq!(shadowed.status, MessageStatus::Shadowed);
    // the recipients see the message normally, unaware of the copy
    let to_bob = recv_messages(&drain(&mut bob_rx));
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_bob[0].status, MessageStatus::Shadowed);
    // the moderator holds a durable copy
    assert!(transcripts
        .user_transcript("mod", meeting.id())
        .unwrap()
        .contains(shadowed.id.as_deref().unwrap()));
    assert!(to_bob[0].shared_with.contains("mod"));
}

#[test]
fn test_content_channel_sanitizes_body_and_broadcasts() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    drain(&mut mod_rx);
    drain(&mut alice_rx);

    let mut msg = message(Channel::Content, "mod", &moderator);
    msg.body = json!({"ntiid": "tag:example.org,2024:lesson-3", "title": "spoiler"});
    msg.recipients = names(&["alice"]);
    assert!(meeting.post_message(msg, &mut transcripts));

    let received = recv_messages(&drain(&mut alice_rx));
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].body,
        json!({"ntiid": "tag:example.org,2024:lesson-3"})
    );
    assert!(received[0].recipients.is_empty());

    // non-moderators may not share content
    let mut from_alice = message(Channel::Content, "alice", &alice);
    from_alice.body = json!({"ntiid": "tag:example.org,2024:lesson-3"});
    assert!(!meeting.post_message(from_alice, &mut transcripts));

    // and a body without a valid reference is rejected outright
    let mut junk = message(Channel::Content, "mod", &moderator);
    junk.body = json!({"ntiid": "not a reference"});
    assert!(!meeting.post_message(junk, &mut transcripts));
}

#[test]
fn test_meta_pin_requires_reference_and_sanitizes() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    drain(&mut mod_rx);
    drain(&mut alice_rx);

    let mut pin = message(Channel::Meta, "mod", &moderator);
    pin.body = json!({
        "channel": "DEFAULT",
        "action": "pin",
        "ntiid": "tag:example.org,2024:note-1",
        "noise": true
    });
    assert!(meeting.post_message(pin, &mut transcripts));
    let received = recv_messages(&drain(&mut alice_rx));
    assert_eq!(
        received[0].body,
        json!({"channel": "DEFAULT", "action": "pin", "ntiid": "tag:example.org,2024:note-1"})
    );

    let mut clear = message(Channel::Meta, "mod", &moderator);
    clear.body = json!({"channel": "DEFAULT", "action": "clearPinned"});
    assert!(meeting.post_message(clear, &mut transcripts));
    let received = recv_messages(&drain(&mut alice_rx));
    assert_eq!(
        received[0].body,
        json!({"channel": "DEFAULT", "action": "clearPinned"})
    );

    // pin without a reference, unknown actions and unknown channels all drop
    let mut bad_pin = message(Channel::Meta, "mod", &moderator);
    bad_pin.body = json!({"channel": "DEFAULT", "action": "pin"});
    assert!(!meeting.post_message(bad_pin, &mut transcripts));

    let mut bad_action = message(Channel::Meta, "mod", &moderator);
    bad_action.body = json!({"channel": "DEFAULT", "action": "unpin"});
    assert!(!meeting.post_message(bad_action, &mut transcripts));

    let mut bad_channel = message(Channel::Meta, "mod", &moderator);
    bad_channel.body = json!({"channel": "SIDEBAND", "action": "clearPinned"});
    assert!(!meeting.post_message(bad_channel, &mut transcripts));

    let mut from_alice = message(Channel::Meta, "alice", &alice);
    from_alice.body = json!({"channel": "DEFAULT", "action": "clearPinned"});
    assert!(!meeting.post_message(from_alice, &mut transcripts));
}

#[test]
fn test_poll_answers_go_to_moderators_only() {
    let dir = directory();
    let (moderator, mut mod_rx) = connect(&dir, "mod");
    let (alice, mut alice_rx) = connect(&dir, "alice");
    let (bob, mut bob_rx) = connect(&dir, "bob");

    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupants(vec![moderator.clone(), alice.clone(), bob.clone()]);
    meeting.set_moderated(true);
    meeting.add_moderator(&moderator);
    for rx in [&mut mod_rx, &mut alice_rx, &mut bob_rx] {
        drain(rx);
    }

    // a moderator poll goes to the whole room
    let mut poll = message(Channel::Poll, "mod", &moderator);
    poll.recipients = names(&["alice"]);
    assert!(meeting.post_message(poll, &mut transcripts));
    let poll_id = recv_messages(&drain(&mut alice_rx))[0].id.clone().unwrap();
    assert_eq!(recv_messages(&drain(&mut bob_rx)).len(), 1);
    drain(&mut mod_rx);

    // an answer is only accepted as a reply, and only moderators see it
    let mut answer = message(Channel::Poll, "alice", &alice);
    answer.in_reply_to = Some(poll_id.clone());
    assert!(meeting.post_message(answer, &mut transcripts));
    assert_eq!(recv_messages(&drain(&mut mod_rx)).len(), 1);
    assert!(recv_messages(&drain(&mut bob_rx)).is_empty());

    let unsolicited = message(Channel::Poll, "bob", &bob);
    assert!(!meeting.post_message(unsolicited, &mut transcripts));
}

#[test]
fn test_inactive_meeting_drops_messages() {
    let dir = directory();
    let (alice, _alice_rx) = connect(&dir, "alice");
    let mut meeting = Meeting::new(dir.clone(), None);
    let mut transcripts = TranscriptStore::new();
    meeting.add_occupant(&alice, false);
    meeting.deactivate();
    assert!(!meeting.post_message(message(Channel::Default, "alice", &alice), &mut transcripts));
}
