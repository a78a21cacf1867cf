pub mod message_outbox;
