use tracing::debug;

use crate::config::WriteGate;

/// De-duplicated page-state notification surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageChange {
    pub index: usize,
    pub page_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Navigation,
    Keyboard,
    Input,
    Preview,
    Remote,
}

/// Focus state accompanying keyboard requests; arrow keys are ignored while
/// an editable element has focus or the surface itself does not.
#[derive(Debug, Clone, Copy)]
pub struct KeyContext {
    pub editable_target: bool,
    pub surface_focused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Previous,
    Next,
}

/// Holds the single authoritative page index. Rejections are silent by
/// design: out-of-range, pre-ready, and permission-denied requests drop with
/// a diagnostic instead of an error.
pub struct PageIndexController {
    current: usize,
    page_count: usize,
    last_emitted: Option<PageChange>,
    gate: WriteGate,
}

impl PageIndexController {
    pub fn new(gate: WriteGate) -> Self {
        Self {
            current: 0,
            page_count: 0,
            last_emitted: None,
            gate,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Marks the document ready. Emits the initial page state once a real
    /// page count is known.
    pub fn set_page_count(&mut self, count: usize) -> Option<PageChange> {
        self.page_count = count;
        if count == 0 {
            return None;
        }
        if self.current >= count {
            self.current = count - 1;
        }
        self.emit()
    }

    pub fn request_relative(&mut self, delta: i64) -> Option<PageChange> {
        self.accept(self.current as i64 + delta, RequestOrigin::Navigation)
    }

    pub fn request_key(&mut self, direction: KeyDirection, context: KeyContext) -> Option<PageChange> {
        if context.editable_target || !context.surface_focused {
            debug!(
                ?direction,
                editable = context.editable_target,
                focused = context.surface_focused,
                "key navigation ignored"
            );
            return None;
        }
        let delta = match direction {
            KeyDirection::Previous => -1,
            KeyDirection::Next => 1,
        };
        self.accept(self.current as i64 + delta, RequestOrigin::Keyboard)
    }

    /// Direct page-number entry. The entered value is 1-based, so `0` maps
    /// to index -1 and falls to the bounds guard.
    pub fn request_entry(&mut self, display_number: i64) -> Option<PageChange> {
        self.accept(display_number - 1, RequestOrigin::Input)
    }

    /// Programmatic absolute navigation, the path behind prev/next controls.
    pub fn request_absolute(&mut self, index: usize) -> Option<PageChange> {
        let target = i64::try_from(index).unwrap_or(i64::MAX);
        self.accept(target, RequestOrigin::Navigation)
    }

    pub fn request_index(&mut self, index: usize) -> Option<PageChange> {
        let target = i64::try_from(index).unwrap_or(i64::MAX);
        self.accept(target, RequestOrigin::Preview)
    }

    /// Inbound replicated page state: bounds-checked like any request but not
    /// permission-gated, and never republished by the caller.
    pub fn apply_remote(&mut self, index: u64) -> Option<PageChange> {
        let target = i64::try_from(index).unwrap_or(i64::MAX);
        self.accept(target, RequestOrigin::Remote)
    }

    fn accept(&mut self, requested: i64, origin: RequestOrigin) -> Option<PageChange> {
        if self.page_count == 0 {
            debug!(requested, ?origin, "page request dropped before document is ready");
            return None;
        }
        if requested < 0 || requested >= self.page_count as i64 {
            debug!(
                requested,
                page_count = self.page_count,
                ?origin,
                "page request out of range"
            );
            return None;
        }
        if origin != RequestOrigin::Remote && !(self.gate)() {
            debug!(requested, ?origin, "page request dropped: writes not permitted");
            return None;
        }
        let index = requested as usize;
        if index == self.current {
            return None;
        }
        self.current = index;
        self.emit()
    }

    fn emit(&mut self) -> Option<PageChange> {
        let change = PageChange {
            index: self.current,
            page_count: self.page_count,
        };
        if self.last_emitted == Some(change) {
            return None;
        }
        self.last_emitted = Some(change);
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn controller() -> PageIndexController {
        PageIndexController::new(Arc::new(|| true))
    }

    fn ready_controller(pages: usize) -> PageIndexController {
        let mut controller = controller();
        controller.set_page_count(pages);
        controller
    }

    #[test]
    fn requests_before_ready_are_dropped() {
        let mut controller = controller();
        assert_eq!(controller.request_relative(1), None);
        assert_eq!(controller.request_index(0), None);
        assert_eq!(controller.current(), 0);
    }

    #[test]
    fn set_page_count_emits_the_initial_state_once() {
        let mut controller = controller();
        assert_eq!(
            controller.set_page_count(3),
            Some(PageChange { index: 0, page_count: 3 })
        );
        assert_eq!(controller.set_page_count(3), None);
    }

    #[test]
    fn out_of_range_requests_are_dropped_not_clamped() {
        let mut controller = ready_controller(3);
        assert_eq!(controller.request_index(5), None);
        assert_eq!(controller.current(), 0);

        controller.request_index(2);
        assert_eq!(controller.request_relative(1), None);
        assert_eq!(controller.current(), 2);
    }

    #[test]
    fn input_entry_zero_maps_below_bounds_and_is_dropped() {
        let mut controller = ready_controller(3);
        controller.request_index(1);
        assert_eq!(controller.request_entry(0), None);
        assert_eq!(controller.current(), 1);

        assert_eq!(
            controller.request_entry(3),
            Some(PageChange { index: 2, page_count: 3 })
        );
    }

    #[test]
    fn keydown_is_ignored_without_usable_focus() {
        let mut controller = ready_controller(3);
        let editable = KeyContext { editable_target: true, surface_focused: true };
        assert_eq!(controller.request_key(KeyDirection::Next, editable), None);

        let unfocused = KeyContext { editable_target: false, surface_focused: false };
        assert_eq!(controller.request_key(KeyDirection::Next, unfocused), None);

        let usable = KeyContext { editable_target: false, surface_focused: true };
        assert_eq!(
            controller.request_key(KeyDirection::Next, usable),
            Some(PageChange { index: 1, page_count: 3 })
        );
    }

    #[test]
    fn denied_write_gate_drops_local_but_not_remote_requests() {
        let mut controller = PageIndexController::new(Arc::new(|| false));
        controller.set_page_count(5);

        assert_eq!(controller.request_index(2), None);
        assert_eq!(controller.request_relative(1), None);
        assert_eq!(controller.current(), 0);

        assert_eq!(
            controller.apply_remote(3),
            Some(PageChange { index: 3, page_count: 5 })
        );
    }

    #[test]
    fn remote_records_are_still_bounds_checked() {
        let mut controller = ready_controller(3);
        assert_eq!(controller.apply_remote(9), None);
        assert_eq!(controller.current(), 0);
    }

    #[test]
    fn identical_index_is_not_re_emitted() {
        let mut controller = ready_controller(3);
        assert_eq!(
            controller.request_index(2),
            Some(PageChange { index: 2, page_count: 3 })
        );
        assert_eq!(controller.request_index(2), None);
        assert_eq!(controller.apply_remote(2), None);
    }

    #[test]
    fn set_page_count_clamps_a_stale_index() {
        let mut controller = ready_controller(10);
        controller.request_index(8);
        let change = controller.set_page_count(4);
        assert_eq!(change, Some(PageChange { index: 3, page_count: 4 }));
    }
}
