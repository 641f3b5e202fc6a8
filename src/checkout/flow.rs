//! The step machine behind the checkout screens: collecting or editing a
//! card (`form`), picking a saved card to pay with (`review`) and the
//! receipt (`success`). Transitions are mirrored into URL query pairs so
//! back/forward navigation re-renders the right screen without re-running
//! any money-moving call.
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    expiry::ExpiryEntry,
    session::{errors::AmountError, CheckoutContext},
};

/// Which screen is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Step {
    Form,
    #[default]
    Review,
    Success,
}

impl Step {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Review => "review",
            Self::Success => "success",
        }
    }
    /// Parse a URL `step` value. Anything unknown falls back to the review
    /// screen, the safe landing spot.
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("form") => Self::Form,
            Some("success") => Self::Success,
            _ => Self::Review,
        }
    }
}

/// The sub-mode within the `form` step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormMode {
    /// Tokenizing a brand-new card; every field is editable.
    #[default]
    Add,
    /// Editing a saved card; only billing name and expiry are editable, the
    /// number and CVC render masked and disabled.
    Edit,
}

impl FormMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
        }
    }
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("edit") => Self::Edit,
            _ => Self::Add,
        }
    }
}

/// A saved card as rendered on the review screen; the server's normalized
/// payment-method representation.
#[derive(Clone, Debug)]
pub struct SavedCard {
    pub id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
    pub billing_name: String,
}

/// The add-card form. The number and CVC never pass through here: the
/// tokenization widget captures them and only reports per-field
/// completeness.
#[derive(Debug, Default)]
pub struct AddCardForm {
    pub name: String,
    pub number_complete: bool,
    pub cvc_complete: bool,
    pub expiry: Option<ExpiryEntry>,
}

impl AddCardForm {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty()
            && self.number_complete
            && self.cvc_complete
            && self.expiry.as_ref().is_some_and(ExpiryEntry::is_complete)
    }
}

/// The edit form for a saved card: billing name and expiry only.
#[derive(Debug)]
pub struct EditCardForm {
    pub name: String,
    pub expiry: ExpiryEntry,
}

impl EditCardForm {
    /// Preload from the selected record.
    pub fn for_card(card: &SavedCard, current_year: i32) -> Self {
        Self {
            name: card.billing_name.clone(),
            expiry: ExpiryEntry::prefill(card.exp_month, card.exp_year, current_year),
        }
    }
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && self.expiry.is_complete()
    }
}

/// A charge the flow wants the server to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeAttempt {
    pub payment_method_id: String,
    pub amount_minor: i64,
    pub currency: String,
    /// Fresh per attempt; forwarded so a double-submitted click cannot
    /// charge twice.
    pub idempotency_key: String,
}

/// The server's answer to a charge attempt, as seen by the client.
#[derive(Clone, Debug)]
pub enum ChargeResult {
    Succeeded { external_id: String },
    RequiresAction { client_secret: String },
    Failed { message: String },
}

/// Receipt data carried onto the success screen.
#[derive(Clone, Debug)]
pub struct Receipt {
    pub external_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub source_tag: String,
    pub reference_id: String,
    pub paid_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlowError {
    /// The saved-card cap pre-empts the add flow client-side; the server
    /// remains the authority and its rejection lands as a banner too.
    #[error("you can keep at most {limit} saved cards")]
    CardLimitReached { limit: usize },
    #[error("no saved card with id {0}")]
    UnknownCard(String),
    #[error("select a card to pay with first")]
    NothingSelected,
    #[error("charges can only be started from the review screen")]
    NotInReview,
    #[error(transparent)]
    InvalidAmount(#[from] AmountError),
}

/// The checkout screen state machine.
#[derive(Debug)]
pub struct CheckoutFlow {
    step: Step,
    mode: FormMode,
    card_limit: usize,
    cards: Vec<SavedCard>,
    selected: Option<String>,
    /// The card being edited while in `form`/`edit`.
    editing: Option<String>,
    /// A delete awaiting its confirmation modal.
    confirm_delete: Option<String>,
    /// Step-up secret for a charge awaiting additional authentication.
    pending_action: Option<String>,
    /// The idempotency key of the in-flight charge attempt.
    attempt_key: Option<String>,
    /// Form-level or business error to render as a banner.
    banner: Option<String>,
    receipt: Option<Receipt>,
}

impl CheckoutFlow {
    pub fn new(card_limit: usize) -> Self {
        Self::restore(None, None, card_limit)
    }

    /// Rebuild the screen state from URL parameters, as on initial load or a
    /// history pop. Restoring never issues any request.
    pub fn restore(step: Option<&str>, mode: Option<&str>, card_limit: usize) -> Self {
        Self {
            step: Step::parse(step),
            mode: FormMode::parse(mode),
            card_limit,
            cards: Vec::new(),
            selected: None,
            editing: None,
            confirm_delete: None,
            pending_action: None,
            attempt_key: None,
            banner: None,
            receipt: None,
        }
    }

    pub const fn step(&self) -> Step {
        self.step
    }
    pub const fn mode(&self) -> FormMode {
        self.mode
    }
    pub fn cards(&self) -> &[SavedCard] {
        &self.cards
    }
    pub fn selected_card(&self) -> Option<&str> {
        self.selected.as_deref()
    }
    pub fn editing_card(&self) -> Option<&str> {
        self.editing.as_deref()
    }
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }
    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }
    pub fn pending_action_secret(&self) -> Option<&str> {
        self.pending_action.as_deref()
    }
    pub fn at_card_limit(&self) -> bool {
        self.cards.len() >= self.card_limit
    }

    /// The query pairs to push into the URL after a transition, so history
    /// navigation can restore this screen.
    pub fn query_pairs(&self) -> Vec<(&'static str, &'static str)> {
        let mut pairs = vec![("step", self.step.as_str())];
        if self.step == Step::Form {
            pairs.push(("mode", self.mode.as_str()));
        }
        pairs
    }

    /// Replace the card list with the server's, e.g. after a re-fetch.
    pub fn set_cards(&mut self, cards: Vec<SavedCard>) {
        if let Some(ref selected) = self.selected {
            if !cards.iter().any(|card| &card.id == selected) {
                self.selected = None;
            }
        }
        self.cards = cards;
    }

    /// Review -> form/add. Pre-empted client-side at the card cap.
    pub fn begin_add(&mut self) -> Result<(), FlowError> {
        if self.at_card_limit() {
            return Err(FlowError::CardLimitReached {
                limit: self.card_limit,
            });
        }
        self.step = Step::Form;
        self.mode = FormMode::Add;
        self.banner = None;
        Ok(())
    }

    /// Review -> form/edit on a saved card.
    pub fn begin_edit(&mut self, card_id: &str) -> Result<(), FlowError> {
        if !self.cards.iter().any(|card| card.id == card_id) {
            return Err(FlowError::UnknownCard(card_id.to_owned()));
        }
        self.step = Step::Form;
        self.mode = FormMode::Edit;
        self.editing = Some(card_id.to_owned());
        self.banner = None;
        Ok(())
    }

    /// The gateway confirmed a new card (or the server an edit): back to
    /// review. The list is appended in place and then re-fetched from the
    /// server for consistency.
    pub fn card_saved(&mut self, card: SavedCard) {
        self.cards.retain(|existing| existing.id != card.id);
        self.cards.push(card);
        self.step = Step::Review;
        self.mode = FormMode::Add;
        self.editing = None;
        self.banner = None;
    }

    /// The gateway or server rejected the save: stay on the form and surface
    /// the message.
    pub fn card_save_failed(&mut self, message: String) {
        self.banner = Some(message);
    }

    pub fn select_card(&mut self, card_id: &str) -> Result<(), FlowError> {
        if !self.cards.iter().any(|card| card.id == card_id) {
            return Err(FlowError::UnknownCard(card_id.to_owned()));
        }
        self.selected = Some(card_id.to_owned());
        Ok(())
    }

    /// Ask for the delete-confirmation modal. No request fires yet.
    pub fn request_delete(&mut self, card_id: &str) -> Result<(), FlowError> {
        if !self.cards.iter().any(|card| card.id == card_id) {
            return Err(FlowError::UnknownCard(card_id.to_owned()));
        }
        self.confirm_delete = Some(card_id.to_owned());
        Ok(())
    }

    /// Dismiss the modal; back to review with nothing sent.
    pub fn cancel_delete(&mut self) {
        self.confirm_delete = None;
    }

    /// Confirm the modal. Returns the card id the delete request should now
    /// be fired for.
    pub fn confirm_delete(&mut self) -> Option<String> {
        self.confirm_delete.take()
    }

    /// The server finished a delete.
    pub fn card_deleted(&mut self, card_id: &str) {
        self.cards.retain(|card| card.id != card_id);
        if self.selected.as_deref() == Some(card_id) {
            self.selected = None;
        }
    }

    /// "Use this payment method": produce the charge the server should
    /// perform, with a fresh idempotency key for this attempt.
    pub fn submit_charge(
        &mut self,
        context: &CheckoutContext,
    ) -> Result<ChargeAttempt, FlowError> {
        if self.step != Step::Review {
            return Err(FlowError::NotInReview);
        }
        let selected = self
            .selected
            .clone()
            .ok_or(FlowError::NothingSelected)?;
        let amount_minor = context.total_minor_units()?;
        let idempotency_key = Uuid::new_v4().to_string();
        self.attempt_key = Some(idempotency_key.clone());
        self.banner = None;
        Ok(ChargeAttempt {
            payment_method_id: selected,
            amount_minor,
            currency: context.currency.clone(),
            idempotency_key,
        })
    }

    /// Apply the server's answer to a charge attempt. Only a terminal
    /// success reaches the success screen; a step-up requirement parks the
    /// flow on review until authentication finishes.
    pub fn charge_resolved(&mut self, result: ChargeResult, context: &CheckoutContext) {
        match result {
            ChargeResult::Succeeded { external_id } => {
                self.complete(external_id, context);
            }
            ChargeResult::RequiresAction { client_secret } => {
                self.pending_action = Some(client_secret);
            }
            ChargeResult::Failed { message } => {
                self.attempt_key = None;
                self.banner = Some(message);
            }
        }
    }

    /// The client-side step-up authentication finished.
    pub fn authentication_finished(
        &mut self,
        external_id: String,
        succeeded: bool,
        context: &CheckoutContext,
    ) {
        self.pending_action = None;
        if succeeded {
            self.complete(external_id, context);
        } else {
            self.attempt_key = None;
            self.banner = Some(String::from(
                "Additional authentication failed. You have not been charged.",
            ));
        }
    }

    fn complete(&mut self, external_id: String, context: &CheckoutContext) {
        self.receipt = Some(Receipt {
            external_id,
            amount_minor: context.total_minor_units().unwrap_or_default(),
            currency: context.currency.clone(),
            source_tag: context.source_tag.clone(),
            reference_id: context.reference_id.clone(),
            paid_at: OffsetDateTime::now_utc(),
        });
        self.attempt_key = None;
        self.step = Step::Success;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str) -> SavedCard {
        SavedCard {
            id: id.to_owned(),
            brand: String::from("visa"),
            last4: String::from("4242"),
            exp_month: 12,
            exp_year: 2028,
            billing_name: String::from("A Perera"),
        }
    }

    fn context() -> CheckoutContext {
        CheckoutContext {
            total: String::from("125.00"),
            currency: String::from("lkr"),
            source_tag: String::from("product_order"),
            reference_id: String::from("ord_9"),
        }
    }

    #[test]
    fn url_restore_lands_on_the_edit_form_without_charging() {
        let flow = CheckoutFlow::restore(Some("form"), Some("edit"), 3);
        assert_eq!(flow.step(), Step::Form);
        assert_eq!(flow.mode(), FormMode::Edit);
        // Restoring produced no charge attempt and no pending action.
        assert!(flow.pending_action_secret().is_none());
        assert!(flow.receipt().is_none());
    }

    #[test]
    fn unknown_url_state_falls_back_to_review() {
        let flow = CheckoutFlow::restore(Some("paid"), Some("wild"), 3);
        assert_eq!(flow.step(), Step::Review);
        assert_eq!(flow.mode(), FormMode::Add);
    }

    #[test]
    fn transitions_mirror_into_query_pairs() {
        let mut flow = CheckoutFlow::new(3);
        assert_eq!(flow.query_pairs(), vec![("step", "review")]);
        flow.begin_add().unwrap();
        assert_eq!(
            flow.query_pairs(),
            vec![("step", "form"), ("mode", "add")]
        );
    }

    #[test]
    fn the_card_cap_preempts_the_add_flow() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1"), card("pm_2"), card("pm_3")]);
        assert_eq!(
            flow.begin_add(),
            Err(FlowError::CardLimitReached { limit: 3 })
        );
        assert_eq!(flow.step(), Step::Review);
    }

    #[test]
    fn a_server_side_cap_rejection_lands_as_a_banner() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1")]);
        flow.begin_add().unwrap();
        flow.card_save_failed(String::from("You can keep at most 3 saved cards"));
        assert_eq!(flow.step(), Step::Form);
        assert!(flow.banner().is_some());
    }

    #[test]
    fn deleting_requires_an_explicit_confirmation() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1")]);
        flow.request_delete("pm_1").unwrap();
        flow.cancel_delete();
        // Cancelled: nothing to fire.
        assert!(flow.confirm_delete().is_none());
        flow.request_delete("pm_1").unwrap();
        assert_eq!(flow.confirm_delete(), Some(String::from("pm_1")));
        flow.card_deleted("pm_1");
        assert!(flow.cards().is_empty());
    }

    #[test]
    fn charging_requires_a_selected_card_on_review() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1")]);
        assert_eq!(
            flow.submit_charge(&context()),
            Err(FlowError::NothingSelected)
        );
        flow.select_card("pm_1").unwrap();
        let attempt = flow.submit_charge(&context()).unwrap();
        assert_eq!(attempt.payment_method_id, "pm_1");
        assert_eq!(attempt.amount_minor, 12_500);
        assert!(!attempt.idempotency_key.is_empty());
    }

    #[test]
    fn each_attempt_carries_a_fresh_idempotency_key() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1")]);
        flow.select_card("pm_1").unwrap();
        let first = flow.submit_charge(&context()).unwrap();
        let second = flow.submit_charge(&context()).unwrap();
        assert_ne!(first.idempotency_key, second.idempotency_key);
    }

    #[test]
    fn success_is_only_reached_on_a_terminal_outcome() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1")]);
        flow.select_card("pm_1").unwrap();
        flow.submit_charge(&context()).unwrap();
        flow.charge_resolved(
            ChargeResult::RequiresAction {
                client_secret: String::from("pi_1_secret"),
            },
            &context(),
        );
        assert_eq!(flow.step(), Step::Review);
        assert_eq!(flow.pending_action_secret(), Some("pi_1_secret"));
        flow.authentication_finished(String::from("pi_1"), true, &context());
        assert_eq!(flow.step(), Step::Success);
        let receipt = flow.receipt().unwrap();
        assert_eq!(receipt.amount_minor, 12_500);
        assert_eq!(receipt.reference_id, "ord_9");
    }

    #[test]
    fn a_failed_step_up_stays_on_review_with_a_banner() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1")]);
        flow.select_card("pm_1").unwrap();
        flow.submit_charge(&context()).unwrap();
        flow.charge_resolved(
            ChargeResult::RequiresAction {
                client_secret: String::from("pi_1_secret"),
            },
            &context(),
        );
        flow.authentication_finished(String::from("pi_1"), false, &context());
        assert_eq!(flow.step(), Step::Review);
        assert!(flow.banner().is_some());
        assert!(flow.receipt().is_none());
    }

    #[test]
    fn a_declined_charge_stays_on_review() {
        let mut flow = CheckoutFlow::new(3);
        flow.set_cards(vec![card("pm_1")]);
        flow.select_card("pm_1").unwrap();
        flow.submit_charge(&context()).unwrap();
        flow.charge_resolved(
            ChargeResult::Failed {
                message: String::from("Your card was declined"),
            },
            &context(),
        );
        assert_eq!(flow.step(), Step::Review);
        assert_eq!(flow.banner(), Some("Your card was declined"));
    }

    #[test]
    fn add_form_completeness_needs_widget_signals_and_a_name() {
        let mut form = AddCardForm {
            name: String::from("A Perera"),
            number_complete: true,
            cvc_complete: true,
            expiry: Some(ExpiryEntry::for_year(2026)),
        };
        assert!(!form.is_complete());
        if let Some(ref mut expiry) = form.expiry {
            expiry.paste("1228");
        }
        assert!(form.is_complete());
        form.name = String::from("   ");
        assert!(!form.is_complete());
    }

    #[test]
    fn edit_form_preloads_from_the_selected_record() {
        let form = EditCardForm::for_card(&card("pm_1"), 2026);
        assert_eq!(form.name, "A Perera");
        assert!(form.expiry.is_complete());
        assert!(form.is_complete());
    }
}
