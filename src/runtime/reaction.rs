//! Turning a settled promise's reactions into queued jobs
//!
//! Reactions are prepended at registration, so a promise holds them newest
//! first. At settlement the list is reversed in place and every node is
//! rewritten as a fulfill or reject job inside its own heap cell, then queued.
//! No job record is ever allocated for a reaction.

use std::mem::{align_of, size_of};

use tracing::debug;

use crate::error::JsError;
use crate::runtime::Runtime;
use crate::value::{
    ExoticObject, JsObjectRef, JsValue, PromiseStatus, ReactionJob, ReactionRecord,
};

/// Number of value slots in a reaction record and in a reaction job
pub const REACTION_SLOTS: usize = size_of::<ReactionRecord>() / size_of::<JsValue>();

const _: () = {
    assert!(size_of::<ReactionRecord>() == size_of::<ReactionJob>());
    assert!(align_of::<ReactionRecord>() == align_of::<ReactionJob>());
    assert!(REACTION_SLOTS == 4);
    assert!(size_of::<ReactionJob>() == REACTION_SLOTS * size_of::<JsValue>());
};

impl Runtime {
    /// Queue one job per reaction in `head`, oldest registration first.
    pub(crate) fn trigger_reactions(
        &mut self,
        head: JsValue,
        status: PromiseStatus,
        argument: JsValue,
    ) -> Result<(), JsError> {
        let mut current = reverse_reactions(head);
        let mut scheduled = 0usize;
        while let JsValue::Object(node) = std::mem::take(&mut current) {
            current = self.morph_reaction(&node, status, argument.clone())?;
            self.queue.enqueue(node);
            scheduled += 1;
        }
        if scheduled > 0 {
            debug!(?status, reactions = scheduled, "reactions scheduled");
        }
        Ok(())
    }

    /// Rewrite `node` from a reaction record into the job for `status`,
    /// keeping the handler that matches and the target. Returns the record's
    /// former `next` link.
    pub(crate) fn morph_reaction(
        &self,
        node: &JsObjectRef,
        status: PromiseStatus,
        argument: JsValue,
    ) -> Result<JsValue, JsError> {
        let fulfilled = match status {
            PromiseStatus::Fulfilled => true,
            PromiseStatus::Rejected => false,
            PromiseStatus::Pending => {
                return Err(JsError::internal_error(
                    "cannot schedule reactions of a pending promise",
                ));
            }
        };

        let mut obj = node.borrow_mut();
        let reaction = match std::mem::take(&mut obj.exotic) {
            ExoticObject::Reaction(reaction) => reaction,
            other => {
                let kind = other.kind_name();
                obj.exotic = other;
                return Err(JsError::internal_error(format!(
                    "expected a promise reaction, found {}",
                    kind
                )));
            }
        };

        let ReactionRecord {
            next,
            reject_handler,
            fulfill_handler,
            target,
        } = reaction;
        let context = self.current_context().clone();
        obj.exotic = if fulfilled {
            ExoticObject::FulfillReactionJob(ReactionJob {
                argument,
                context,
                handler: fulfill_handler,
                target,
            })
        } else {
            ExoticObject::RejectReactionJob(ReactionJob {
                argument,
                context,
                handler: reject_handler,
                target,
            })
        };
        Ok(next)
    }
}

/// Reverse a reaction list in place by relinking `next`. Returns the new head.
fn reverse_reactions(head: JsValue) -> JsValue {
    let mut current = head;
    let mut reversed = JsValue::Undefined;
    while let JsValue::Object(node) = std::mem::take(&mut current) {
        let next = match &mut node.borrow_mut().exotic {
            ExoticObject::Reaction(reaction) => std::mem::replace(&mut reaction.next, reversed),
            _ => break,
        };
        reversed = JsValue::Object(node);
        current = next;
    }
    reversed
}
