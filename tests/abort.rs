//! Abort protocol coverage: same-thread interrupts from a filter
//! callback and cross-thread cancellation of a blocked parse.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use xylem::{
    builder::{ContentFilter, FilterVerdict},
    dom::{Document, NodeId},
    parser::DomParser,
};

struct InterruptFilter;

impl ContentFilter for InterruptFilter {
    fn accept_node(&mut self, _doc: &Document, _node: NodeId) -> FilterVerdict {
        FilterVerdict::Interrupt
    }
}

#[test]
fn filter_interrupt_unwinds_as_cancelled() {
    let mut parser = DomParser::new();
    parser.set_filter(Some(Box::new(InterruptFilter)));
    let err = parser
        .parse_str("<root><child/>text</root>", None)
        .unwrap_err();
    assert!(err.is_cancelled(), "expected cancellation, got {err}");
    // The parser is reusable after the unwind.
    parser.set_filter(None);
    assert!(parser.parse_str("<root/>", None).is_ok());
}

/// Filter that parks the worker mid-parse so the test can abort from
/// the outside at a known point.
struct GateFilter {
    ready: mpsc::Sender<()>,
    gate: mpsc::Receiver<()>,
    fired: bool,
}

impl ContentFilter for GateFilter {
    fn accept_node(&mut self, _doc: &Document, _node: NodeId) -> FilterVerdict {
        if !self.fired {
            self.fired = true;
            self.ready.send(()).ok();
            // Block until the aborting thread releases us.
            self.gate.recv().ok();
        }
        FilterVerdict::Accept
    }
}

#[test]
fn cross_thread_abort_unwinds_the_parse() {
    let (handle_tx, handle_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        let mut parser = DomParser::new();
        parser.set_filter(Some(Box::new(GateFilter {
            ready: ready_tx,
            gate: gate_rx,
            fired: false,
        })));
        handle_tx.send(parser.abort_handle()).unwrap();
        // The build output holds shared strings and must not cross the
        // thread boundary; only the outcome does.
        parser
            .parse_str(
                "<root><first>x</first><second>y</second><third>z</third></root>",
                None,
            )
            .map(|_| ())
    });

    let handle = handle_rx.recv().expect("worker sends its abort handle");
    // Wait until the worker is parked inside the filter checkpoint,
    // abort, then release it.
    ready_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("worker reaches the checkpoint");
    handle.abort();
    gate_tx.send(()).unwrap();

    let result = worker.join().expect("worker thread finishes");
    let err = result.expect_err("aborted parse must not produce a document");
    assert!(err.is_cancelled(), "expected cancellation, got {err}");
}

#[test]
fn abort_after_completion_loses_the_race() {
    let mut parser = DomParser::new();
    let handle = parser.abort_handle();
    let output = parser.parse_str("<root>done</root>", None).unwrap();
    // The parse finished naturally; aborting now has no effect on the
    // completed result, and the next parse re-arms the token.
    handle.abort();
    drop(output);
    assert!(parser.parse_str("<root/>", None).is_ok());
}
