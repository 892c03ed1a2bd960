use crate::runtime::{Callable, Value};
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Handle to a scope frame inside an [`Environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<FrameId>,
    // Possibly referenced by a function value; only the collector frees it.
    captured: bool,
}

/// Arena of scope frames.
///
/// Frames are addressed by [`FrameId`] and linked to their parent by id, so a
/// frame chain can never form a cycle and a function value only needs to hold
/// the id of its defining frame. Block and call frames are recycled when they
/// are popped. Frames a function value captured outlive their scope and are
/// reclaimed by [`collect`](Environment::collect) once no function value
/// reachable from the global frame refers to them.
#[derive(Debug)]
pub struct Environment {
    frames: Vec<Frame>,
    free: Vec<usize>,
    // Captured frames other than the global one.
    captured: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                captured: true,
                ..Frame::default()
            }],
            free: Vec::new(),
            captured: 0,
        }
    }

    /// The root frame every other frame descends from.
    pub fn global(&self) -> FrameId {
        FrameId(0)
    }

    pub fn push_frame(&mut self, parent: FrameId) -> FrameId {
        let frame = Frame {
            parent: Some(parent),
            ..Frame::default()
        };

        let id = match self.free.pop() {
            Some(index) => {
                self.frames[index] = frame;
                FrameId(index)
            }
            None => {
                self.frames.push(frame);
                FrameId(self.frames.len() - 1)
            }
        };

        trace!("push frame {:?} (parent {:?})", id, parent);
        id
    }

    /// Releases a frame on scope exit unless a closure may still refer to it.
    pub fn pop_frame(&mut self, id: FrameId) {
        if self.frames[id.0].captured {
            trace!("keep captured frame {:?}", id);
            return;
        }
        self.release(id.0);
        trace!("pop frame {:?}", id);
    }

    fn release(&mut self, index: usize) {
        if self.frames[index].captured {
            self.captured -= 1;
        }
        let vars = std::mem::take(&mut self.frames[index].vars);
        self.frames[index] = Frame::default();
        self.free.push(index);
        drop(vars);
    }

    /// Marks `id` and all of its ancestors as referenced by a function value.
    pub fn capture(&mut self, id: FrameId) {
        let mut current = Some(id);
        while let Some(FrameId(index)) = current {
            let frame = &mut self.frames[index];
            if frame.captured {
                break;
            }
            frame.captured = true;
            current = frame.parent;
            self.captured += 1;
        }
    }

    /// Frees captured frames that no function value reachable from the global
    /// frame refers to, returning how many were freed.
    ///
    /// Only sound while no frame other than the global one is active and no
    /// value lives outside the arena, i.e. between top-level statements.
    pub fn collect(&mut self) -> usize {
        if self.captured == 0 {
            return 0;
        }

        let mut marked = vec![false; self.frames.len()];
        let mut seen_lists: HashSet<*const RefCell<Vec<Value>>> = HashSet::new();
        let mut frames = vec![self.global()];
        let mut values: Vec<Value> = Vec::new();

        while let Some(FrameId(index)) = frames.pop() {
            if marked[index] {
                continue;
            }
            marked[index] = true;

            let frame = &self.frames[index];
            frames.extend(frame.parent);
            values.extend(frame.vars.values().cloned());

            while let Some(value) = values.pop() {
                match &value {
                    Value::Callable(Callable::Function(function)) => frames.push(function.closure),
                    Value::List(items) if seen_lists.insert(Rc::as_ptr(items)) => {
                        values.extend(items.borrow().iter().cloned());
                    }
                    _ => {}
                }
            }
        }

        let in_free: HashSet<usize> = self.free.iter().copied().collect();
        let garbage: Vec<usize> = (0..self.frames.len())
            .filter(|&index| self.frames[index].captured && !marked[index])
            .filter(|index| !in_free.contains(index))
            .collect();

        for &index in &garbage {
            self.release(index);
        }

        if !garbage.is_empty() {
            debug!("collected {} unreachable frames", garbage.len());
        }
        garbage.len()
    }

    pub fn get(&self, frame: FrameId, name: &str) -> Option<&Value> {
        let mut current = Some(frame);
        while let Some(FrameId(index)) = current {
            let frame = &self.frames[index];
            if let Some(value) = frame.vars.get(name) {
                return Some(value);
            }
            current = frame.parent;
        }
        None
    }

    /// Binds `name` in `frame` itself, shadowing any outer binding.
    pub fn define(&mut self, frame: FrameId, name: impl Into<String>, value: Value) {
        self.frames[frame.0].vars.insert(name.into(), value);
    }

    /// Rebinds `name` in the nearest frame that already has it, or declares it
    /// in `frame` when no frame in the chain does.
    pub fn assign_or_define(&mut self, frame: FrameId, name: &str, value: Value) {
        let mut current = Some(frame);
        while let Some(FrameId(index)) = current {
            if let Some(slot) = self.frames[index].vars.get_mut(name) {
                *slot = value;
                return;
            }
            current = self.frames[index].parent;
        }

        self.define(frame, name, value);
    }

    /// Number of frames currently allocated (captured or in use).
    pub fn live_frames(&self) -> usize {
        self.frames.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Function;

    #[test]
    fn test_lookup_walks_to_the_root() {
        let mut env = Environment::new();
        let global = env.global();
        env.define(global, "x", Value::Integer(1));

        let block = env.push_frame(global);
        let inner = env.push_frame(block);
        assert_eq!(env.get(inner, "x"), Some(&Value::Integer(1)));
        assert_eq!(env.get(inner, "missing"), None);
    }

    #[test]
    fn test_define_shadows() {
        let mut env = Environment::new();
        let global = env.global();
        env.define(global, "x", Value::Integer(1));

        let block = env.push_frame(global);
        env.define(block, "x", Value::Integer(2));
        assert_eq!(env.get(block, "x"), Some(&Value::Integer(2)));
        assert_eq!(env.get(global, "x"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_assign_or_define_updates_outer_binding() {
        let mut env = Environment::new();
        let global = env.global();
        env.define(global, "n", Value::Integer(3));

        let block = env.push_frame(global);
        env.assign_or_define(block, "n", Value::Integer(2));
        env.pop_frame(block);

        assert_eq!(env.get(global, "n"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_assign_or_define_declares_locally() {
        let mut env = Environment::new();
        let global = env.global();

        let block = env.push_frame(global);
        env.assign_or_define(block, "fresh", Value::Boolean(true));
        assert_eq!(env.get(block, "fresh"), Some(&Value::Boolean(true)));
        assert_eq!(env.get(global, "fresh"), None);
    }

    #[test]
    fn test_popped_frames_are_recycled() {
        let mut env = Environment::new();
        let global = env.global();

        for i in 0..100 {
            let block = env.push_frame(global);
            env.define(block, "i", Value::Integer(i));
            env.pop_frame(block);
        }

        assert_eq!(env.live_frames(), 1);

        // A recycled slot starts empty.
        let block = env.push_frame(global);
        assert_eq!(env.get(block, "i"), None);
    }

    fn function_value(closure: FrameId) -> Value {
        Value::Callable(Callable::Function(Rc::new(Function {
            name: "f".to_string(),
            params: Vec::new(),
            body: Rc::from(Vec::new()),
            closure,
        })))
    }

    #[test]
    fn test_captured_frames_survive_pop() {
        let mut env = Environment::new();
        let global = env.global();

        let outer = env.push_frame(global);
        let inner = env.push_frame(outer);
        env.define(outer, "captured", Value::Integer(7));
        env.capture(inner);

        env.pop_frame(inner);
        env.pop_frame(outer);

        assert_eq!(env.live_frames(), 3);
        assert_eq!(env.get(inner, "captured"), Some(&Value::Integer(7)));
    }

    #[test]
    fn test_collect_keeps_frames_reachable_from_global() {
        let mut env = Environment::new();
        let global = env.global();

        let outer = env.push_frame(global);
        let inner = env.push_frame(outer);
        env.define(outer, "captured", Value::Integer(7));
        env.capture(inner);
        env.pop_frame(inner);
        env.pop_frame(outer);

        // Reachable through a list holding the function value.
        env.define(global, "fs", Value::list(vec![function_value(inner)]));

        assert_eq!(env.collect(), 0);
        assert_eq!(env.live_frames(), 3);
        assert_eq!(env.get(inner, "captured"), Some(&Value::Integer(7)));
    }

    #[test]
    fn test_collect_frees_unreachable_frames() {
        let mut env = Environment::new();
        let global = env.global();

        for _ in 0..50 {
            let call = env.push_frame(global);
            // The frame holds a function closing over itself.
            env.define(call, "inner", function_value(call));
            env.capture(call);
            env.pop_frame(call);
        }

        assert_eq!(env.live_frames(), 51);
        assert_eq!(env.collect(), 50);
        assert_eq!(env.live_frames(), 1);
        assert_eq!(env.collect(), 0);
    }
}
