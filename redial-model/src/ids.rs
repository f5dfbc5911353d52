use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Strongly typed id for a contact to be called.
    LeadId
);
entity_id!(
    /// Strongly typed id for an outbound calling campaign.
    CampaignId
);
entity_id!(
    /// Strongly typed id for the schedulable (campaign, lead) pairing.
    CampaignLeadId
);
entity_id!(
    /// Strongly typed id for a single dispatch attempt.
    CallId
);
entity_id!(
    /// Strongly typed id for a scheduled follow-up call.
    CallbackId
);
entity_id!(
    /// Strongly typed id for a campaign call script.
    ScriptId
);
entity_id!(
    /// Strongly typed id for an append-only audit record.
    AuditEntryId
);
