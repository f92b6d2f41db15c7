pub mod v1_identity_schema;
pub mod v2_social_graph_schema;
pub mod v3_message_schema;
