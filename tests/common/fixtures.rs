//! Shared flow fixtures.

use chatflow::flows::{AnswerRule, FlowGraph, FlowGraphBuilder, FlowSettings, NodeKind};

/// The support onboarding flow: greet, collect a name, offer a product
/// menu, collect a choice, thank and close.
pub fn support_flow() -> FlowGraph {
    FlowGraphBuilder::new("support")
        .add_node("start", NodeKind::Start)
        .add_node(
            "hello",
            NodeKind::Message {
                text: "Hello {{name}}!".into(),
            },
        )
        .add_node(
            "ask_name",
            NodeKind::Question {
                prompt: "What's your name?".into(),
                variable: "name".into(),
                rule: AnswerRule::NonEmpty,
                retry_text: None,
            },
        )
        .add_node(
            "menu",
            NodeKind::Message {
                text: "Pick a product:\n1. Basic\n2. Plus\n3. Max".into(),
            },
        )
        .add_node(
            "ask_product",
            NodeKind::Question {
                prompt: "Reply with 1, 2 or 3".into(),
                variable: "product".into(),
                rule: AnswerRule::OneOf {
                    options: vec!["1".into(), "2".into(), "3".into()],
                },
                retry_text: Some("Sorry, reply with 1, 2 or 3".into()),
            },
        )
        .add_node(
            "thanks",
            NodeKind::End {
                text: Some("Thanks {{name}}! Product {{product}} is on the way.".into()),
            },
        )
        .add_edge("e1", "start", "hello")
        .add_edge("e2", "hello", "ask_name")
        .add_edge("e3", "ask_name", "menu")
        .add_edge("e4", "menu", "ask_product")
        .add_edge("e5", "ask_product", "thanks")
        .build()
        .expect("support flow is valid")
}

/// A flow whose settings exercise the sweeper: short TTL, pre-expiry
/// warning, expiration notice, and a redirect into `followup`.
pub fn expiring_flow(ttl_secs: u64, warning_threshold_secs: u64) -> FlowGraph {
    FlowGraphBuilder::new("survey")
        .with_settings(FlowSettings {
            session_ttl_secs: Some(ttl_secs),
            warning_threshold_secs: Some(warning_threshold_secs),
            warning_text: Some("Still there? This chat expires soon.".into()),
            expiration_text: Some("This chat has expired.".into()),
            redirect_flow: Some("followup".into()),
            ..FlowSettings::default()
        })
        .add_node("start", NodeKind::Start)
        .add_node(
            "ask",
            NodeKind::Question {
                prompt: "How did we do?".into(),
                variable: "rating".into(),
                rule: AnswerRule::Any,
                retry_text: None,
            },
        )
        .add_node("done", NodeKind::End { text: None })
        .add_edge("e1", "start", "ask")
        .add_edge("e2", "ask", "done")
        .build()
        .expect("survey flow is valid")
}

/// Target of the expiry redirect: a single goodbye message.
pub fn followup_flow() -> FlowGraph {
    FlowGraphBuilder::new("followup")
        .add_node("start", NodeKind::Start)
        .add_node(
            "bye",
            NodeKind::End {
                text: Some("We'd love to hear from you another time.".into()),
            },
        )
        .add_edge("e1", "start", "bye")
        .build()
        .expect("followup flow is valid")
}

/// A flow that suspends on a DELAY before closing.
pub fn delayed_flow(delay_secs: u64) -> FlowGraph {
    FlowGraphBuilder::new("drip")
        .add_node("start", NodeKind::Start)
        .add_node(
            "teaser",
            NodeKind::Message {
                text: "Here's a tip to get you started.".into(),
            },
        )
        .add_node("wait", NodeKind::Delay { seconds: delay_secs })
        .add_node(
            "followup",
            NodeKind::End {
                text: Some("Ready for more?".into()),
            },
        )
        .add_edge("e1", "start", "teaser")
        .add_edge("e2", "teaser", "wait")
        .add_edge("e3", "wait", "followup")
        .build()
        .expect("drip flow is valid")
}
