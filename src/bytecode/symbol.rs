use rustc_hash::FxHashMap;

/// Where a resolved name lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    /// A local that has been given a value. Unassigned locals are invisible
    /// to their own scope, so `a := a` reads an outer `a`.
    pub local_assigned: bool,
}

/// Handle into the symbol arena.
pub type SymbolId = usize;

#[derive(Debug, Default)]
struct Scope {
    /// Block scopes share the slot space of the enclosing function.
    block: bool,
    store: FxHashMap<String, SymbolId>,
    num_definition: usize,
    max_definition: usize,
    /// Captured symbols of enclosing scopes, in capture order.
    free: Vec<SymbolId>,
}

/// Compile-time name resolution.
///
/// Scopes form a stack: the root is the global scope, function bodies push
/// a non-block scope, nested blocks push block scopes. Symbols live in an
/// arena so a captured symbol and its original stay one record.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
    builtins: Vec<SymbolId>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            scopes: vec![Scope::default()],
            builtins: Vec::new(),
        }
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    /// Define `name` in the innermost scope.
    pub fn define(&mut self, name: &str) -> SymbolId {
        let level = self.top();
        let index = self.next_index(level);
        let global = self.function_level(level) == 0;

        self.scopes[level].num_definition += 1;
        if global && level > 0 {
            // globals defined in blocks keep their slot for the whole run
            self.scopes[level].num_definition -= 1;
            self.scopes[0].num_definition += 1;
        }

        let id = self.push_symbol(Symbol {
            name: name.to_string(),
            scope: if global {
                SymbolScope::Global
            } else {
                SymbolScope::Local
            },
            index,
            local_assigned: false,
        });
        self.scopes[level].store.insert(name.to_string(), id);
        self.update_max_defs(level, index + 1);
        id
    }

    /// Register builtin `name` at table index `index` in the root scope.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> SymbolId {
        let id = self.push_symbol(Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
            local_assigned: false,
        });
        self.scopes[0].store.insert(name.to_string(), id);
        self.builtins.push(id);
        id
    }

    /// Resolve `name` from the innermost scope outward. Returns the symbol
    /// and the number of scopes crossed. Locals of enclosing functions are
    /// turned into free symbols of every function in between.
    pub fn resolve(&mut self, name: &str) -> Option<(SymbolId, usize)> {
        self.resolve_at(self.top(), name, false)
    }

    fn resolve_at(&mut self, level: usize, name: &str, recur: bool) -> Option<(SymbolId, usize)> {
        if let Some(&id) = self.scopes[level].store.get(name) {
            let s = &self.symbols[id];
            if s.scope != SymbolScope::Local || s.local_assigned || recur {
                return Some((id, 0));
            }
        }
        if level == 0 {
            return None;
        }

        let (id, depth) = self.resolve_at(level - 1, name, true)?;
        let depth = depth + 1;
        let scope = self.symbols[id].scope;
        if !self.scopes[level].block && !matches!(scope, SymbolScope::Global | SymbolScope::Builtin) {
            return Some((self.define_free(level, id), depth));
        }
        Some((id, depth))
    }

    fn define_free(&mut self, level: usize, original: SymbolId) -> SymbolId {
        self.scopes[level].free.push(original);
        let name = self.symbols[original].name.clone();
        let id = self.push_symbol(Symbol {
            name: name.clone(),
            scope: SymbolScope::Free,
            index: self.scopes[level].free.len() - 1,
            local_assigned: false,
        });
        self.scopes[level].store.insert(name, id);
        id
    }

    pub fn mark_local_assigned(&mut self, id: SymbolId) {
        self.symbols[id].local_assigned = true;
    }

    /// Enter a nested scope.
    pub fn fork(&mut self, block: bool) {
        self.scopes.push(Scope {
            block,
            ..Scope::default()
        });
    }

    /// Leave the innermost scope. The root scope is never popped.
    pub fn unfork(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Slots needed by the innermost scope (locals of a function, or
    /// globals at the root).
    pub fn max_symbols(&self) -> usize {
        self.scopes[self.top()].max_definition
    }

    /// Symbols captured by the innermost scope, in slot order.
    pub fn free_symbols(&self) -> Vec<SymbolId> {
        self.scopes[self.top()].free.clone()
    }

    /// `(index, name)` of every builtin, in definition order.
    pub fn builtin_symbols(&self) -> Vec<(usize, String)> {
        self.builtins
            .iter()
            .map(|id| (self.symbols[*id].index, self.symbols[*id].name.clone()))
            .collect()
    }

    /// Names defined directly in the root scope, builtins excluded.
    pub fn global_names(&self) -> Vec<(String, usize)> {
        let mut names: Vec<_> = self.scopes[0]
            .store
            .values()
            .map(|id| &self.symbols[*id])
            .filter(|s| s.scope == SymbolScope::Global)
            .map(|s| (s.name.clone(), s.index))
            .collect();
        names.sort_by_key(|(_, idx)| *idx);
        names
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn top(&self) -> usize {
        self.scopes.len() - 1
    }

    fn push_symbol(&mut self, symbol: Symbol) -> SymbolId {
        self.symbols.push(symbol);
        self.symbols.len() - 1
    }

    /// Level of the function (non-block) scope enclosing `level`.
    fn function_level(&self, mut level: usize) -> usize {
        while level > 0 && self.scopes[level].block {
            level -= 1;
        }
        level
    }

    fn next_index(&self, level: usize) -> usize {
        if self.scopes[level].block {
            self.next_index(level - 1) + self.scopes[level].num_definition
        } else {
            self.scopes[level].num_definition
        }
    }

    fn update_max_defs(&mut self, level: usize, num_defs: usize) {
        let scope = &mut self.scopes[level];
        if num_defs > scope.max_definition {
            scope.max_definition = num_defs;
        }
        if scope.block && level > 0 {
            self.update_max_defs(level - 1, num_defs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(t: &mut SymbolTable, name: &str) -> (Symbol, usize) {
        let (id, depth) = t.resolve(name).expect("name resolves");
        (t.symbol(id).clone(), depth)
    }

    fn assigned(t: &mut SymbolTable, name: &str) -> SymbolId {
        let id = t.define(name);
        t.mark_local_assigned(id);
        id
    }

    #[test]
    fn root_definitions_are_global() {
        let mut t = SymbolTable::new();
        t.define("a");
        t.define("b");
        let (b, depth) = resolved(&mut t, "b");
        assert_eq!((b.scope, b.index, depth), (SymbolScope::Global, 1, 0));
        assert_eq!(t.max_symbols(), 2);
    }

    #[test]
    fn global_blocks_never_reuse_slots() {
        let mut t = SymbolTable::new();
        t.define("a");
        t.fork(true);
        t.define("b");
        t.unfork();
        t.fork(true);
        let c = t.define("c");
        assert_eq!(t.symbol(c).index, 2);
        assert_eq!(t.symbol(c).scope, SymbolScope::Global);
        t.unfork();
        assert_eq!(t.max_symbols(), 3);
    }

    #[test]
    fn function_blocks_share_local_slots() {
        let mut t = SymbolTable::new();
        t.fork(false);
        assigned(&mut t, "x");
        t.fork(true);
        let y = assigned(&mut t, "y");
        assert_eq!(t.symbol(y).index, 1);
        assert_eq!(t.symbol(y).scope, SymbolScope::Local);
        t.unfork();
        assert_eq!(t.max_symbols(), 2);
    }

    #[test]
    fn enclosing_locals_become_free() {
        let mut t = SymbolTable::new();
        t.define("g");
        t.fork(false);
        assigned(&mut t, "outer");
        t.fork(false);
        t.fork(true);
        let (sym, depth) = resolved(&mut t, "outer");
        // a block resolves through to the function's free slot
        assert_eq!((sym.scope, sym.index, depth), (SymbolScope::Free, 0, 2));
        t.unfork();
        assert_eq!(t.free_symbols().len(), 1);
        let (g, _) = resolved(&mut t, "g");
        assert_eq!(g.scope, SymbolScope::Global);
    }

    #[test]
    fn free_symbols_chain_through_functions() {
        let mut t = SymbolTable::new();
        t.fork(false);
        let v = assigned(&mut t, "v");
        t.fork(false);
        t.fork(false);
        let (sym, _) = resolved(&mut t, "v");
        assert_eq!(sym.scope, SymbolScope::Free);
        let inner_free = t.free_symbols();
        t.unfork();
        let middle_free = t.free_symbols();
        assert_eq!(middle_free, vec![v]);
        assert_eq!(t.symbol(inner_free[0]).scope, SymbolScope::Free);
    }

    #[test]
    fn unassigned_local_is_not_visible_to_itself() {
        let mut t = SymbolTable::new();
        t.fork(false);
        assigned(&mut t, "a");
        t.fork(true);
        t.define("a");
        let (sym, depth) = resolved(&mut t, "a");
        assert_eq!((sym.index, depth), (0, 1));
    }

    #[test]
    fn builtins_resolve_from_anywhere() {
        let mut t = SymbolTable::new();
        t.define_builtin(3, "len");
        t.fork(false);
        t.fork(false);
        let (sym, _) = resolved(&mut t, "len");
        assert_eq!((sym.scope, sym.index), (SymbolScope::Builtin, 3));
        assert!(t.free_symbols().is_empty());
        assert_eq!(t.builtin_symbols(), vec![(3, "len".to_string())]);
    }
}
