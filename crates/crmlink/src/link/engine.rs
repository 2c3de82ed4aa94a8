//! The linking engine: evaluates one message and links its chain to the
//! CRM entities its participants resolve to.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::broadcast::{ActivityKind, ActivityLog};
use crate::crm::{
    AccessControl, AllowAll, ContactDirectory, ContactResolver, HistoryService, NoopHistoryService,
};
use crate::error::LinkError;
use crate::link::outcome::LinkOutcome;
use crate::link::store::{ChainLink, LinkStore};
use crate::mail::{address, MailStore};
use crate::model::{ContactRef, Message, MessageOptions};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub load_attachments: bool,
    pub check_access: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            load_attachments: true,
            check_access: true,
        }
    }
}

pub struct LinkingEngine {
    store: LinkStore,
    mail: Arc<dyn MailStore>,
    resolver: ContactResolver,
    access: Arc<dyn AccessControl>,
    history: Arc<dyn HistoryService>,
    activity: ActivityLog,
    options: EngineOptions,
}

impl LinkingEngine {
    /// Creates an engine that grants every access check and records
    /// history only in the database.
    pub fn new(
        store: LinkStore,
        mail: Arc<dyn MailStore>,
        directory: Arc<dyn ContactDirectory>,
        activity: ActivityLog,
    ) -> Self {
        Self {
            store,
            mail,
            resolver: ContactResolver::new(directory),
            access: Arc::new(AllowAll),
            history: Arc::new(NoopHistoryService),
            activity,
            options: EngineOptions::default(),
        }
    }

    pub fn with_access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryService>) -> Self {
        self.history = history;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mail(&self) -> &Arc<dyn MailStore> {
        &self.mail
    }

    /// Evaluates one message. Never fails: every error becomes `Skipped`.
    pub fn process_message(&self, message: &Message) -> LinkOutcome {
        let span = info_span!("process_message", tenant = message.tenant, message_id = message.id);
        let _enter = span.enter();

        let outcome = match self.evaluate(message) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    tenant = message.tenant,
                    message_id = message.id,
                    error = %e,
                    "Skipping message"
                );
                LinkOutcome::Skipped(e.to_string())
            }
        };
        self.report(message, &outcome);
        outcome
    }

    /// Loads a message by id and evaluates it.
    pub fn process_message_id(&self, tenant: i64, message_id: i64) -> LinkOutcome {
        match self.mail.get_message(tenant, message_id) {
            Ok(Some(message)) => self.process_message(&message),
            Ok(None) => {
                let e = LinkError::MessageNotFound { tenant, message_id };
                warn!(tenant, message_id, "{}", e);
                LinkOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                warn!(tenant, message_id, error = %e, "Failed to load message");
                LinkOutcome::Skipped(e.to_string())
            }
        }
    }

    fn evaluate(&self, message: &Message) -> Result<LinkOutcome, LinkError> {
        let tenant = message.tenant;
        let chain_id = message.chain().ok_or(LinkError::MissingChain(message.id))?;

        if !self
            .store
            .linked_contacts(tenant, chain_id, message.mailbox_id)?
            .is_empty()
        {
            debug!(chain_id, "Chain already linked");
            return Ok(LinkOutcome::AlreadyLinked);
        }

        let addresses = address::extract(&message.participant_fields());
        let mut contacts = BTreeSet::new();
        let mut failed_lookups = 0usize;
        for address in &addresses {
            match self.resolver.resolve(tenant, address) {
                Ok(found) => contacts.extend(found),
                Err(e) => {
                    failed_lookups += 1;
                    warn!(address = %address, error = %e, "Contact lookup failed");
                    self.activity.warn(
                        ActivityKind::ResolverFailed,
                        tenant,
                        message.id,
                        format!("Lookup of {} failed: {}", address, e),
                    );
                }
            }
        }

        if contacts.is_empty() {
            // Without a clean set of lookups "no match" is not established.
            if failed_lookups > 0 {
                return Err(LinkError::Directory(format!(
                    "{} of {} address lookups failed",
                    failed_lookups,
                    addresses.len()
                )));
            }
            self.store
                .create_no_match_tombstone(tenant, message.id, &message.user_id)?;
            return Ok(LinkOutcome::NoMatch);
        }

        if self.options.check_access {
            contacts = self.accessible(message, contacts);
            if contacts.is_empty() {
                self.store
                    .create_no_match_tombstone(tenant, message.id, &message.user_id)?;
                return Ok(LinkOutcome::NoMatch);
            }
        }

        let chain = self
            .mail
            .chain_messages(tenant, message.mailbox_id, chain_id)?;
        if chain.is_empty() {
            return Err(LinkError::EmptyChain {
                mailbox_id: message.mailbox_id,
                chain_id: chain_id.to_string(),
            });
        }

        let options = MessageOptions {
            load_body: true,
            load_attachments: self.options.load_attachments,
        };
        let messages = chain
            .iter()
            .map(|m| self.mail.get_full_message(tenant, m.id, options))
            .collect::<Result<Vec<_>, _>>()?;

        let summary = self.store.link_chain(
            &ChainLink {
                tenant,
                mailbox_id: message.mailbox_id,
                chain_id,
                contacts: &contacts,
                messages: &messages,
                created_by: &message.user_id,
            },
            self.history.as_ref(),
        )?;
        debug!(
            links = summary.links_inserted,
            events = summary.events_created,
            existing = summary.events_existing,
            files = summary.files_uploaded,
            "Chain linked"
        );

        Ok(LinkOutcome::Linked(contacts.into_iter().collect()))
    }

    /// Drops entities the message owner cannot access.
    fn accessible(
        &self,
        message: &Message,
        contacts: BTreeSet<ContactRef>,
    ) -> BTreeSet<ContactRef> {
        let principal = message.owner();
        contacts
            .into_iter()
            .filter(|entity| {
                let reason = match self.access.can_access(&principal, entity) {
                    Ok(true) => return true,
                    Ok(false) => "access denied".to_string(),
                    Err(e) => e.to_string(),
                };
                warn!(%entity, user = %principal.user_id, %reason, "Dropping inaccessible entity");
                self.activity.warn(
                    ActivityKind::AccessDenied,
                    message.tenant,
                    message.id,
                    format!("Dropped {}: {}", entity, reason),
                );
                false
            })
            .collect()
    }

    fn report(&self, message: &Message, outcome: &LinkOutcome) {
        let (tenant, id) = (message.tenant, message.id);
        match outcome {
            LinkOutcome::Linked(contacts) => {
                info!(tenant, message_id = id, contacts = contacts.len(), "Linked chain");
                self.activity
                    .info(ActivityKind::Linked, tenant, id, outcome.describe());
            }
            LinkOutcome::NoMatch => {
                debug!(tenant, message_id = id, "No CRM match");
                self.activity
                    .info(ActivityKind::NoMatch, tenant, id, outcome.describe());
            }
            LinkOutcome::AlreadyLinked => {
                self.activity
                    .info(ActivityKind::AlreadyLinked, tenant, id, outcome.describe());
            }
            LinkOutcome::Skipped(_) => {
                self.activity
                    .warn(ActivityKind::Skipped, tenant, id, outcome.describe());
            }
        }
    }
}
