/// Orthogonal sub-state tracked alongside the Respondent's main loop (§4.6
/// "State machine summary"):
///
/// `off -> Pending` on `setOperator` or a trigger escalation; `Pending ->
/// Permanent` on the first operator reply; `Pending -> off` on the
/// operator-response timeout or a `no_tg_id` connection error; `Permanent ->
/// off` on a `"Set-Mode-To-AI"` control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorMode {
    Off,
    Pending,
    Permanent,
}

impl OperatorMode {
    pub fn is_active(self) -> bool {
        !matches!(self, OperatorMode::Off)
    }
}
