mod common;

use common::{entry_route, history, keys, Screen};
use flowstate::config::RuntimeConfig;
use flowstate::navigation::{
    GroupNavigation, HostHistory, NavRequest, NavigationResult, NavigationStack, StackOptions,
};
use flowstate::Runtime;
use std::sync::Arc;
use std::time::Duration;

fn payment_stack() -> NavigationStack<Screen> {
    NavigationStack::builder("payment-stack", Screen::Payments).build()
}

/// Test that push followed by pop restores the previous top with its params.
#[test]
fn test_push_pop_symmetry() {
    let stack = payment_stack();
    stack.push(Screen::PaymentAmount { amount: 250 }).unwrap();
    let before = stack.frames();

    stack.push(Screen::PaymentConfirm { amount: 1 }).unwrap();
    stack.pop().unwrap();

    assert_eq!(stack.frames(), before);
    assert_eq!(stack.top().route, Screen::PaymentAmount { amount: 250 });
}

/// Test that push-and-pop-until collapses to the matching frame.
#[test]
fn test_push_and_pop_until_collapses_wizard() {
    let stack = NavigationStack::builder("home-stack", Screen::Home).build();
    stack.push(Screen::Payments).unwrap();
    stack.push(Screen::PaymentAmount { amount: 5 }).unwrap();
    stack.push(Screen::PaymentConfirm { amount: 5 }).unwrap();

    stack
        .push_and_pop_until(
            Screen::TransactionDetail {
                id: "t1".to_string(),
            },
            |frame| frame.key() == "payments",
        )
        .unwrap();

    assert_eq!(
        keys(&stack.frames()),
        vec!["home", "payments", "transaction-detail"]
    );
}

/// Test that replace does not grow the stack.
#[test]
fn test_replace_keeps_depth() {
    let stack = payment_stack();
    stack.push(Screen::PaymentConfirm { amount: 9 }).unwrap();
    stack
        .replace(Screen::TransactionDetail {
            id: "t9".to_string(),
        })
        .unwrap();

    assert_eq!(stack.depth(), 2);
    stack.pop().unwrap();
    assert_eq!(stack.top().route, Screen::Payments);
}

/// Test that a screen's pending work sees it is no longer on top.
#[test]
fn test_is_top_guards_stale_writes() {
    let stack = payment_stack();
    let amount = stack.handle(stack.push(Screen::PaymentAmount { amount: 1 }).unwrap());
    assert!(amount.is_top());

    stack.push(Screen::PaymentConfirm { amount: 1 }).unwrap();
    assert!(!amount.is_top());
    assert!(!stack.handle(stack.entry().token).is_top());
}

/// Test that every mutation is mirrored onto host history.
#[test]
fn test_host_history_mirrors_stack() {
    let host = history();
    let stack = NavigationStack::builder("payment-stack", Screen::Payments)
        .history(host.clone())
        .build();

    stack.push(Screen::PaymentAmount { amount: 3 }).unwrap();
    let detail = stack
        .push(Screen::TransactionDetail {
            id: "t3".to_string(),
        })
        .unwrap();
    assert_eq!(host.depth(), 3);
    assert_eq!(
        host.current().unwrap(),
        (detail, "/transaction-detail/t3".to_string())
    );

    stack.pop().unwrap();
    assert_eq!(host.depth(), 2);
    assert_eq!(host.current().unwrap().0, stack.top().token);
}

/// Test that host-originated back and forward reconcile the stack.
#[test]
fn test_host_back_forward_reconcile() {
    let host = history();
    let stack = NavigationStack::builder("payment-stack", Screen::Payments)
        .history(host.clone())
        .build();
    stack.push(Screen::PaymentAmount { amount: 3 }).unwrap();
    stack.push(Screen::PaymentConfirm { amount: 3 }).unwrap();

    stack.handle_host_event(host.user_back().unwrap()).unwrap();
    stack.handle_host_event(host.user_back().unwrap()).unwrap();
    assert_eq!(keys(&stack.frames()), vec!["payments"]);

    stack.handle_host_event(host.user_forward().unwrap()).unwrap();
    assert_eq!(keys(&stack.frames()), vec!["payments", "payment-amount"]);
    assert_eq!(host.current().unwrap().0, stack.top().token);

    // A push after going back drops the forward entries on both sides.
    stack.push(Screen::Profile).unwrap();
    assert!(host.user_forward().is_none());
    assert_eq!(host.depth(), stack.depth());
}

/// Test that a failed host transition leaves the stack unchanged.
#[test]
fn test_failed_transition_is_reported() {
    struct Refusing;
    impl HostHistory for Refusing {
        fn push(
            &self,
            _token: flowstate::navigation::FrameToken,
            _path: &str,
        ) -> Result<(), flowstate::navigation::HistoryError> {
            Err(flowstate::navigation::HistoryError::Rejected {
                operation: "push",
                reason: "navigation locked".to_string(),
            })
        }
        fn replace(
            &self,
            _token: flowstate::navigation::FrameToken,
            _path: &str,
        ) -> Result<(), flowstate::navigation::HistoryError> {
            Ok(())
        }
        fn back(&self, _steps: usize) -> Result<(), flowstate::navigation::HistoryError> {
            Ok(())
        }
    }

    let stack = NavigationStack::builder("payment-stack", Screen::Payments)
        .history(Arc::new(Refusing))
        .build();
    assert!(stack.push(Screen::Profile).is_err());
    assert_eq!(stack.depth(), 1);
}

/// Test the three outcomes of an awaited navigation.
#[tokio::test(start_paused = true)]
async fn test_navigate_outcomes() {
    let stack = NavigationStack::builder("payment-stack", Screen::Payments)
        .options(StackOptions {
            transition_timeout: Duration::from_secs(1),
            ..StackOptions::default()
        })
        .build();

    // Completed once the target frame renders.
    let pending = {
        let stack = stack.clone();
        tokio::spawn(async move {
            stack
                .navigate(NavRequest::Push(Screen::PaymentAmount { amount: 1 }))
                .await
        })
    };
    while stack.depth() == 1 {
        tokio::task::yield_now().await;
    }
    stack.handle(stack.top().token).mark_rendered();
    assert!(pending.await.unwrap().is_completed());

    // Cancelled by a newer navigation.
    let pending = {
        let stack = stack.clone();
        tokio::spawn(async move {
            stack
                .navigate(NavRequest::Push(Screen::PaymentConfirm { amount: 1 }))
                .await
        })
    };
    while stack.depth() == 2 {
        tokio::task::yield_now().await;
    }
    let newer = stack.navigate(NavRequest::Pop).await;
    assert!(matches!(
        pending.await.unwrap(),
        NavigationResult::Cancelled
    ));
    assert!(matches!(newer, NavigationResult::TimedOut));

    // Rendering a frame that is not the target does not complete it.
    let stale = stack.entry().token;
    let pending = {
        let stack = stack.clone();
        tokio::spawn(async move { stack.navigate(NavRequest::Push(Screen::Profile)).await })
    };
    while stack.depth() == 2 {
        tokio::task::yield_now().await;
    }
    stack.mark_rendered(stale);
    assert!(matches!(
        pending.await.unwrap(),
        NavigationResult::TimedOut
    ));
}

/// Test that switching tabs preserves each stack's frames.
#[test]
fn test_group_switch_preserves_frames() {
    let runtime = Runtime::builder(RuntimeConfig::default(), entry_route)
        .build()
        .unwrap();
    let tabs = runtime.navigation();

    tabs.set_current("payment-stack").unwrap();
    tabs.current_stack()
        .push(Screen::PaymentAmount { amount: 40 })
        .unwrap();

    tabs.set_current("profile-stack").unwrap();
    assert_eq!(tabs.current_stack().depth(), 1);

    tabs.set_current("payment-stack").unwrap();
    assert_eq!(
        tabs.current_stack().top().route,
        Screen::PaymentAmount { amount: 40 }
    );
}

/// Test that group host events go to the visible stack only.
#[test]
fn test_group_routes_host_events_to_current() {
    let payment_host = history();
    let home_host = history();
    let stacks = vec![
        NavigationStack::builder("home-stack", Screen::Home)
            .history(home_host.clone())
            .build(),
        NavigationStack::builder("payment-stack", Screen::Payments)
            .history(payment_host.clone())
            .build(),
    ];
    let group = GroupNavigation::new("tabs", stacks, Some("payment-stack"), None, "nav").unwrap();

    group.current_stack().push(Screen::Profile).unwrap();
    group.stack("home-stack").unwrap().push(Screen::Profile).unwrap();

    group
        .handle_host_event(payment_host.user_back().unwrap())
        .unwrap();
    assert_eq!(group.current_stack().depth(), 1);
    assert_eq!(group.stack("home-stack").unwrap().depth(), 2);
}
