use core::fmt;
use std::borrow::Borrow;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

use crate::error::TreeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

impl Color {
    /// Returns `true` if the color is [`Red`].
    ///
    /// [`Red`]: Color::Red
    #[must_use]
    fn is_red(&self) -> bool {
        matches!(self, Self::Red)
    }

    /// Returns `true` if the color is [`Black`].
    ///
    /// [`Black`]: Color::Black
    #[must_use]
    fn is_black(&self) -> bool {
        matches!(self, Self::Black)
    }
}

/// Color of a possibly absent node. An absent child position counts as black.
fn color_of<K>(node: Option<RawNode<K>>) -> Color {
    match node {
        Some(node) => unsafe { node.color() },
        None => Color::Black,
    }
}

struct Node<K> {
    key: K,
    color: Color,
    parent: Option<RawNode<K>>,
    left: Option<RawNode<K>>,
    right: Option<RawNode<K>>,
}

impl<K> fmt::Debug for Node<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("Node");
        f.field("key", &self.key).field("color", &self.color);

        let mut dbg_opt_node = |name: &str, node: &Option<RawNode<K>>| match node {
            Some(node) => {
                let node = unsafe { node.as_ref() };
                f.field(name, &(&node.key, &node.color));
            }
            None => {
                f.field(name, &None::<K>);
            }
        };
        dbg_opt_node("parent", &self.parent);
        dbg_opt_node("left", &self.left);
        dbg_opt_node("right", &self.right);

        f.finish()
    }
}

/// Wrapper around `NonNull<Node<K>>` to provide convenient methods in order
/// to make the tree algorithms much more readable.
#[derive(Debug, PartialEq, Eq)]
#[repr(transparent)]
struct RawNode<K> {
    ptr: NonNull<Node<K>>,
}

impl<K> Clone for RawNode<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for RawNode<K> {}

impl<K> RawNode<K> {
    fn from_node(node: Node<K>) -> Self {
        Self {
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(node))) },
        }
    }

    #[inline]
    fn as_ptr(&self) -> *mut Node<K> {
        self.ptr.as_ptr()
    }

    #[inline]
    unsafe fn as_ref<'a>(&self) -> &'a Node<K> {
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    unsafe fn key<'a>(&self) -> &'a K {
        unsafe { &(*self.as_ptr()).key }
    }

    #[inline]
    unsafe fn parent(&self) -> Option<RawNode<K>> {
        unsafe { (*self.as_ptr()).parent }
    }

    #[inline]
    unsafe fn set_parent(&mut self, new_parent: Option<RawNode<K>>) {
        unsafe {
            (*self.as_ptr()).parent = new_parent;
        }
    }

    #[inline]
    unsafe fn right(&self) -> Option<RawNode<K>> {
        unsafe { (*self.as_ptr()).right }
    }

    #[inline]
    unsafe fn set_right(&mut self, new_right: Option<RawNode<K>>) {
        unsafe {
            (*self.as_ptr()).right = new_right;
        }
    }

    #[inline]
    unsafe fn left(&self) -> Option<RawNode<K>> {
        unsafe { (*self.as_ptr()).left }
    }

    #[inline]
    unsafe fn set_left(&mut self, new_left: Option<RawNode<K>>) {
        unsafe {
            (*self.as_ptr()).left = new_left;
        }
    }

    #[inline]
    unsafe fn color(&self) -> Color {
        unsafe { (*self.as_ptr()).color }
    }

    #[inline]
    unsafe fn set_color(&mut self, new_color: Color) {
        unsafe { (*self.as_ptr()).color = new_color }
    }

    #[inline]
    unsafe fn pos(&self) -> NodePos {
        let ptr = self.as_ptr();
        match unsafe { (*ptr).parent } {
            Some(p) => match unsafe { (p.left(), p.right()) } {
                (None, None) => unreachable!(),
                (None, Some(_)) => NodePos::Right,
                (Some(_), None) => NodePos::Left,
                (Some(left), Some(right)) => {
                    if ptr::eq(ptr, left.as_ptr()) {
                        NodePos::Left
                    } else {
                        assert!(ptr::eq(ptr, right.as_ptr()));
                        NodePos::Right
                    }
                }
            },
            None => NodePos::Root,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePos {
    Root,
    Left,
    Right,
}

/// Opaque handle to a node stored in an [`RbTree`].
///
/// Handles are cheap to copy and stay valid until the node they refer to is
/// erased or the tree is dropped. Using a handle past that point, or with a
/// tree it was not obtained from, is a contract violation; [`RbTree::erase`]
/// detects the other-tree case, the rest is the caller's responsibility.
pub struct NodeRef<K> {
    raw: RawNode<K>,
}

impl<K> Clone for NodeRef<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for NodeRef<K> {}

impl<K> PartialEq for NodeRef<K> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.raw.as_ptr(), other.raw.as_ptr())
    }
}

impl<K> Eq for NodeRef<K> {}

impl<K> fmt::Debug for NodeRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeRef").field(&self.raw.as_ptr()).finish()
    }
}

/// An ordered container of keys backed by a red-black tree.
///
/// Duplicate keys are allowed; on insertion an equal key always descends to
/// the right of the existing one.
pub struct RbTree<K> {
    root: Option<RawNode<K>>,
    len: usize,
    marker: PhantomData<Box<Node<K>>>,
}

impl<K> Drop for RbTree<K> {
    fn drop(&mut self) {
        // TODO: handle panics in `K::drop`

        unsafe fn inner<K>(node: RawNode<K>) {
            if let Some(l) = unsafe { node.left() } {
                unsafe { inner(l) };
            }
            if let Some(r) = unsafe { node.right() } {
                unsafe { inner(r) };
            }
            let _: Box<Node<K>> = unsafe { Box::from_raw(node.as_ptr()) };
        }

        if let Some(root) = self.root.take() {
            self.len = 0;
            unsafe { inner(root) };
        }
    }
}

impl<K> Default for RbTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for RbTree<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct TreeDebug<'a, K> {
            root: RawNode<K>,
            marker: PhantomData<&'a Node<K>>,
        }

        impl<K> fmt::Debug for TreeDebug<'_, K>
        where
            K: fmt::Debug,
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut f = f.debug_list();

                let mut func = |node: RawNode<K>| {
                    let node = unsafe { node.as_ref() };
                    f.entry(&node);
                };

                unsafe { RbTree::inorder_core(self.root, &mut func) };
                f.finish()
            }
        }

        let mut f = f.debug_struct("RbTree");
        f.field("len", &self.len);

        match self.root {
            None => {
                f.field("root", &None::<K>);
                let nodes: &[K] = &[];
                f.field("nodes", &nodes);
            }
            Some(root) => {
                f.field("root", &Some(unsafe { root.as_ref() }));
                f.field(
                    "nodes",
                    &TreeDebug {
                        root,
                        marker: PhantomData,
                    },
                );
            }
        }

        f.finish()
    }
}

impl<K> RbTree<K> {
    pub fn new() -> Self {
        Self {
            root: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Calls `f` on every key in ascending order.
    pub fn inorder_for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K),
    {
        if let Some(root) = self.root {
            let mut f = |node: RawNode<K>| f(unsafe { node.key() });
            unsafe { Self::inorder_core(root, &mut f) }
        }
    }

    unsafe fn inorder_core<F>(node: RawNode<K>, f: &mut F)
    where
        F: FnMut(RawNode<K>),
    {
        if let Some(l) = unsafe { node.left() } {
            unsafe { Self::inorder_core(l, f) };
        }
        f(node);
        if let Some(r) = unsafe { node.right() } {
            unsafe { Self::inorder_core(r, f) };
        }
    }

    /// Returns all keys in ascending order.
    ///
    /// With duplicates present the result is the full stored multiset,
    /// equal keys adjacent.
    pub fn to_ordered_vec(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut keys = Vec::with_capacity(self.len);
        self.inorder_for_each(|k| keys.push(k.clone()));
        keys
    }

    /// Returns a handle to a node whose key equals `key`, or `None` if no
    /// such node exists.
    ///
    /// With duplicates present this is the first match on the descent path;
    /// which duplicate that is follows from the insert tie-break (equal keys
    /// descend right).
    pub fn find<Q>(&self, key: &Q) -> Option<NodeRef<K>>
    where
        K: Borrow<Q>,
        Q: Ord,
    {
        self.get_raw(key).map(|raw| NodeRef { raw })
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord,
    {
        self.get_raw(key).is_some()
    }

    fn get_raw<Q>(&self, key: &Q) -> Option<RawNode<K>>
    where
        K: Borrow<Q>,
        Q: Ord,
    {
        let mut maybe_node = self.root;
        while let Some(node) = maybe_node {
            match key.cmp(unsafe { node.key() }.borrow()) {
                std::cmp::Ordering::Less => maybe_node = unsafe { node.left() },
                std::cmp::Ordering::Equal => return Some(node),
                std::cmp::Ordering::Greater => maybe_node = unsafe { node.right() },
            }
        }

        None
    }

    /// Returns the key stored in `node`.
    ///
    /// `node` must be a live handle obtained from this tree.
    pub fn key_of(&self, node: NodeRef<K>) -> &K {
        unsafe { node.raw.key() }
    }

    /// Returns a handle to the node holding the smallest key, or `None` if
    /// the tree is empty.
    pub fn min(&self) -> Option<NodeRef<K>> {
        let root = self.root?;
        let raw = unsafe { Self::min_of(root) };
        Some(NodeRef { raw })
    }

    unsafe fn min_of(root: RawNode<K>) -> RawNode<K> {
        let mut x = root;
        while let Some(left) = unsafe { x.left() } {
            x = left;
        }

        x
    }

    /// Returns a handle to the node holding the largest key, or `None` if
    /// the tree is empty.
    pub fn max(&self) -> Option<NodeRef<K>> {
        let root = self.root?;
        let raw = unsafe { Self::max_of(root) };
        Some(NodeRef { raw })
    }

    unsafe fn max_of(root: RawNode<K>) -> RawNode<K> {
        let mut x = root;
        while let Some(right) = unsafe { x.right() } {
            x = right;
        }

        x
    }

    fn rotate_left(&mut self, mut node: RawNode<K>) {
        //    p                       p
        //    |                       |
        // +-node-+               +-right-+
        // |      |      -->      |       |
        // a  +-right-+       +-node-+    c
        //    |       |       |      |
        //    b       c       a      b
        // where a, b, c can be any subtrees
        unsafe {
            if let Some(mut right) = node.right() {
                // attach b to node
                let b = right.left();
                node.set_right(b);
                if let Some(mut new_right) = node.right() {
                    new_right.set_parent(Some(node));
                }

                // attach right to parent
                let parent = node.parent();
                right.set_parent(parent);
                match node.pos() {
                    NodePos::Root => self.root = Some(right),
                    NodePos::Left => parent.unwrap().set_left(Some(right)),
                    NodePos::Right => parent.unwrap().set_right(Some(right)),
                }

                // attach node to right
                right.set_left(Some(node));
                node.set_parent(Some(right));
            }
        }
    }

    fn rotate_right(&mut self, mut node: RawNode<K>) {
        //         p              p
        //         |              |
        //     +-node-+       +-left-+
        //     |      |       |      |
        // +-left-+   c  -->  a  +-node-+
        // |      |              |      |
        // a      b              b      c
        // where a, b, c can be any subtrees

        unsafe {
            if let Some(mut left) = node.left() {
                // attach b to node
                let b = left.right();
                node.set_left(b);
                if let Some(mut new_left) = node.left() {
                    new_left.set_parent(Some(node));
                }

                // attach left to parent
                let parent = node.parent();
                left.set_parent(parent);
                match node.pos() {
                    NodePos::Root => self.root = Some(left),
                    NodePos::Left => parent.unwrap().set_left(Some(left)),
                    NodePos::Right => parent.unwrap().set_right(Some(left)),
                }

                // attach node to left
                left.set_right(Some(node));
                node.set_parent(Some(left));
            }
        }
    }

    /// Inserts `key` and returns a handle to the new node.
    ///
    /// Always creates a node. An equal key descends to the right of the
    /// existing one, so duplicates end up adjacent in the in-order sequence.
    pub fn insert(&mut self, key: K) -> NodeRef<K>
    where
        K: Ord,
    {
        // Move left/right down the tree until we find an empty slot
        let mut parent = None;
        let mut goes_left = false;
        let mut maybe_node = self.root;
        while let Some(node) = maybe_node {
            parent = maybe_node;
            unsafe {
                if key < *node.key() {
                    goes_left = true;
                    maybe_node = node.left();
                } else {
                    goes_left = false;
                    maybe_node = node.right();
                }
            }
        }

        // new node is a leaf, it cannot have left or right subtrees
        let new_node = RawNode::from_node(Node {
            key,
            color: Color::Red,
            parent,
            left: None,
            right: None,
        });
        // update parent to point to the new node
        match parent {
            Some(mut parent) => unsafe {
                if goes_left {
                    parent.set_left(Some(new_node));
                } else {
                    parent.set_right(Some(new_node));
                }
            },
            None => self.root = Some(new_node),
        }

        self.len += 1;
        self.insert_fixup(new_node);
        NodeRef { raw: new_node }
    }

    fn insert_fixup(&mut self, new_node: RawNode<K>) {
        let mut node = new_node;
        unsafe {
            loop {
                match node.parent() {
                    Some(mut parent) if parent.color().is_red() => {
                        debug_assert!(node.color().is_red());
                        // red-black properties are violated because red parent has a red child
                        //
                        // Note that there is only one violation at this point.
                        // At first iteration it's the new_node and it's parent.
                        // If we take the "red uncle" branch then at next iteration it will be
                        // the grand_parent and it's parent that violate the red-black properties.
                        // If we take the other branch, there will be no more iterations as that
                        // will result in a black parent.

                        match parent.pos() {
                            NodePos::Root => unreachable!(),
                            NodePos::Left => {
                                // grand_parent must exist because parent is red and
                                // thus not root as root is always black
                                let mut grand_parent = parent.parent().unwrap();
                                let uncle = grand_parent.right();
                                debug_assert!(grand_parent.color().is_black());

                                match uncle {
                                    Some(mut uncle) if uncle.color().is_red() => {
                                        //     +--- gp:b ---+               +--- gp:r ---+
                                        //     |            |               |            |
                                        //  + p:r +      + u:r +   -->   + p:b +      + u:b +
                                        //  |     |      |     |         |     |      |     |
                                        // n:r   a:b    b:b   c:b       n:r   a:b    b:b   c:b
                                        // (a, b, c can be any subtrees)
                                        //
                                        // Color parent and uncle black and grandparent red, which
                                        // keeps the black height unchanged on every path.
                                        // Now the grand parent may also have a red parent, but we
                                        // can simply repeat the process as if the grand parent was
                                        // the newly added node.
                                        parent.set_color(Color::Black);
                                        uncle.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        node = grand_parent;
                                    }
                                    _ => {
                                        if let NodePos::Right = node.pos() {
                                            //       +-- gp:b --+                 +-- gp:b --+
                                            //       |          |                 |          |
                                            //  +-- p:r --+    u:b  -->       +- n:r --+    u:b
                                            //  |         |                   |        |
                                            // a:b    +- n:r -+           +- p:r -+   c:b
                                            //        |       |           |       |
                                            //       b:b     c:b         a:b     b:b
                                            // (a, b, c, u can be any subtrees)
                                            //
                                            // left rotate parent and swap node and parent pointers
                                            // so we match the case below
                                            self.rotate_left(parent);
                                            mem::swap(&mut parent, &mut node);
                                        }

                                        //           +-- gp:b --+            +----- p:b -----+
                                        //           |          |            |               |
                                        //      +-- p:r --+    u:b  -->   +- n:r -+     +- gp:r -+
                                        //      |         |               |       |     |        |
                                        //  +- n:r -+    c:b             a:b     b:b   c:b      u:b
                                        //  |       |
                                        // a:b     b:b
                                        //
                                        // (a, b, c, u can be any subtrees)
                                        //
                                        // Note that this fixes the one violation we had and thus
                                        // the whole tree is again a proper red-black tree.

                                        parent.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        self.rotate_right(grand_parent);
                                    }
                                }
                            }
                            NodePos::Right => {
                                // same as Left branch but left/right are switched
                                let mut grand_parent = parent.parent().unwrap();
                                let uncle = grand_parent.left();

                                match uncle {
                                    Some(mut uncle) if uncle.color().is_red() => {
                                        parent.set_color(Color::Black);
                                        uncle.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        node = grand_parent;
                                    }
                                    _ => {
                                        if let NodePos::Left = node.pos() {
                                            self.rotate_right(parent);
                                            mem::swap(&mut parent, &mut node);
                                        }

                                        parent.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        self.rotate_left(grand_parent);
                                    }
                                }
                            }
                        }
                    }
                    _ => break,
                }
            }

            if let Some(mut root) = self.root {
                root.set_color(Color::Black);
            }
        }
    }

    /// Removes the node `node` refers to and returns its key.
    ///
    /// Returns [`TreeError::ForeignNode`] and leaves the tree untouched if
    /// the handle belongs to a different tree. Passing a handle whose node
    /// was already erased is a contract violation that cannot be detected.
    pub fn erase(&mut self, node: NodeRef<K>) -> Result<K, TreeError> {
        if !self.owns(node.raw) {
            return Err(TreeError::ForeignNode);
        }

        Ok(self.erase_raw(node.raw))
    }

    /// Removes one node holding `key`, returning its key, or `None` if no
    /// such node exists.
    pub fn erase_key<Q>(&mut self, key: &Q) -> Option<K>
    where
        K: Borrow<Q>,
        Q: Ord,
    {
        self.get_raw(key).map(|node| self.erase_raw(node))
    }

    /// Walks the parent links up from `node` and checks that they end at
    /// this tree's root.
    fn owns(&self, node: RawNode<K>) -> bool {
        let root = match self.root {
            Some(root) => root,
            None => return false,
        };

        let mut cur = node;
        while let Some(parent) = unsafe { cur.parent() } {
            cur = parent;
        }

        ptr::eq(cur.as_ptr(), root.as_ptr())
    }

    fn erase_raw(&mut self, node: RawNode<K>) -> K {
        unsafe {
            let mut doomed = node;
            if node.left().is_some() && node.right().is_some() {
                // Two children: swap keys with the in-order successor, the
                // minimum of the right subtree, and physically remove that
                // node instead. The successor has no left child so the
                // removal below is the at-most-one-child case. `node` stays
                // in place holding the successor's key, which keeps the
                // BST order intact.
                let succ = Self::min_of(node.right().unwrap());
                mem::swap(&mut (*node.as_ptr()).key, &mut (*succ.as_ptr()).key);
                doomed = succ;
            }

            // doomed has at most one child; splice it out by linking that
            // child (or nothing) to its parent in its place
            debug_assert!(doomed.left().is_none() || doomed.right().is_none());
            let child = doomed.left().or(doomed.right());
            let parent = doomed.parent();
            match doomed.pos() {
                NodePos::Root => self.root = child,
                NodePos::Left => parent.unwrap().set_left(child),
                NodePos::Right => parent.unwrap().set_right(child),
            }
            if let Some(mut child) = child {
                child.set_parent(parent);
            }

            // Removing a red node cannot change any black height and cannot
            // create a red-red edge, so only a black removal needs fixup.
            if doomed.color().is_black() {
                self.delete_fixup(child, parent);
            }

            let doomed = Box::from_raw(doomed.as_ptr());
            self.len -= 1;
            doomed.key
        }
    }

    /// Restores the red-black properties after a black node was removed and
    /// `x` (possibly absent) took its place as the child of `x_parent`.
    fn delete_fixup(&mut self, mut x: Option<RawNode<K>>, mut x_parent: Option<RawNode<K>>) {
        // All paths through x are one black node short. Treat x as carrying
        // an extra black that has to be resolved.
        //
        // If x is red then we moved a red node up into the removed node's
        // place and recoloring it black after the loop restores the black
        // heights. If x is the root the missing black is missing from every
        // path equally, so nothing is broken. Otherwise run the sibling
        // case analysis, which either resolves the extra black locally or
        // moves it one level up the tree.
        unsafe {
            while color_of(x).is_black() {
                let Some(mut parent) = x_parent else {
                    // x is the root (or the tree just became empty)
                    break;
                };

                // When x is absent, the side the removal happened on is the
                // side whose child link is now empty. The parent cannot have
                // two empty links here: the sibling subtree must contain at
                // least one black node to match the removed one.
                let x_is_left = match x {
                    Some(n) => parent
                        .left()
                        .is_some_and(|l| ptr::eq(l.as_ptr(), n.as_ptr())),
                    None => parent.left().is_none(),
                };

                if x_is_left {
                    // sibling must exist, see above
                    let mut sibling = parent.right().unwrap();

                    if sibling.color().is_red() {
                        // case 1
                        //
                        //     +--- p:b ---+                    +--- s:b ---+
                        //     |           |                    |           |
                        // +- x:b -+   +- s:r -+   -->      +- p:r -+      d:b
                        // |       |   |       |            |       |
                        // a       b  c:b     d:b       +- x:b -+  c:b
                        //                              |       |
                        //                              a       b
                        //
                        // x's paths are still one black short but x now has
                        // a red parent and a black sibling, turning this
                        // into case 2, 3 or 4 which terminate or make
                        // progress.
                        debug_assert!(parent.color().is_black());
                        sibling.set_color(Color::Black);
                        parent.set_color(Color::Red);
                        self.rotate_left(parent);
                        sibling = parent.right().unwrap();
                    }

                    debug_assert!(sibling.color().is_black());

                    if color_of(sibling.left()).is_black() && color_of(sibling.right()).is_black()
                    {
                        // case 2: take one black off both x and the sibling
                        // and move the extra black up to the parent
                        //
                        //     +--- p:c ---+                +--- p:c ---+
                        //     |           |                |           |
                        // +- x:b -+   +- s:b -+   -->  +- x:b -+   +- s:r -+
                        // |       |   |       |        |       |   |       |
                        // a       b  c:b     d:b       a       b  c:b     d:b
                        //
                        // If the parent is red the next iteration exits the
                        // loop and recolors it black, restoring the black
                        // height everywhere.
                        sibling.set_color(Color::Red);
                        x = Some(parent);
                        x_parent = parent.parent();
                    } else {
                        if color_of(sibling.right()).is_black() {
                            // case 3: near child red, far child black
                            //
                            //    +---- p:c ----+               +--- p:c ---+
                            //    |             |               |           |
                            // +- x:b -+    +- s:b -+   -->  +- x:b -+  +- c:b -+
                            // |       |    |       |        |       |   |      |
                            // a       b  +-c:r-+  d:b       a       b   e  +- s:r -+
                            //            |     |                           |       |
                            //            e     f                           f      d:b
                            //
                            // Turns into case 4 without changing any black
                            // counts.
                            sibling.left().unwrap().set_color(Color::Black);
                            sibling.set_color(Color::Red);
                            self.rotate_right(sibling);
                            sibling = parent.right().unwrap();
                        }

                        // case 4: far child red
                        //
                        //     +--- p:c ---+                 +--- s:c ---+
                        //     |           |                 |           |
                        // +- x:b -+   +- s:b -+   -->   +- p:b -+      d:b
                        // |       |   |       |         |       |
                        // a       b  c:b     d:r    +- x:b -+  c:b
                        //                           |       |
                        //                           a       b
                        //
                        // x's paths gain the missing black node through the
                        // now-black parent, d's paths trade the red far
                        // child for a black one. Fixup terminates.
                        sibling.set_color(parent.color());
                        parent.set_color(Color::Black);
                        sibling.right().unwrap().set_color(Color::Black);
                        self.rotate_left(parent);
                        break;
                    }
                } else {
                    // mirror image of the branch above
                    let mut sibling = parent.left().unwrap();

                    if sibling.color().is_red() {
                        // case 1
                        debug_assert!(parent.color().is_black());
                        sibling.set_color(Color::Black);
                        parent.set_color(Color::Red);
                        self.rotate_right(parent);
                        sibling = parent.left().unwrap();
                    }

                    debug_assert!(sibling.color().is_black());

                    if color_of(sibling.left()).is_black() && color_of(sibling.right()).is_black()
                    {
                        // case 2
                        sibling.set_color(Color::Red);
                        x = Some(parent);
                        x_parent = parent.parent();
                    } else {
                        if color_of(sibling.left()).is_black() {
                            // case 3
                            sibling.right().unwrap().set_color(Color::Black);
                            sibling.set_color(Color::Red);
                            self.rotate_left(sibling);
                            sibling = parent.left().unwrap();
                        }

                        // case 4
                        sibling.set_color(parent.color());
                        parent.set_color(Color::Black);
                        sibling.left().unwrap().set_color(Color::Black);
                        self.rotate_right(parent);
                        break;
                    }
                }
            }

            if let Some(mut x) = x {
                x.set_color(Color::Black);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Checks the red-black tree properties by recursive descent:
    /// BST order within (lo, hi) bounds, no red node with a red child and
    /// equal black height on every path. Returns the black height.
    fn check_subtree(node: &Node<i32>, lo: Option<i32>, hi: Option<i32>) -> u64 {
        if let Some(lo) = lo {
            assert!(node.key >= lo, "BST order violated: {} < {}", node.key, lo);
        }
        if let Some(hi) = hi {
            assert!(node.key <= hi, "BST order violated: {} > {}", node.key, hi);
        }

        let left_height = match node.left {
            Some(left) => {
                let left = unsafe { left.as_ref() };
                if node.color.is_red() {
                    assert!(
                        left.color.is_black(),
                        "left child of red node must be black: {:#?}",
                        node
                    );
                }
                check_subtree(left, lo, Some(node.key))
            }
            None => 0,
        };
        let right_height = match node.right {
            Some(right) => {
                let right = unsafe { right.as_ref() };
                if node.color.is_red() {
                    assert!(
                        right.color.is_black(),
                        "right child of red node must be black: {:#?}",
                        node
                    );
                }
                check_subtree(right, Some(node.key), hi)
            }
            None => 0,
        };
        assert_eq!(
            left_height, right_height,
            "black height mismatch at key {}",
            node.key
        );

        left_height + node.color.is_black() as u64
    }

    fn assert_red_blackness(tree: &RbTree<i32>) {
        let Some(root) = tree.root else {
            return;
        };
        let root = unsafe { root.as_ref() };
        assert_eq!(root.color, Color::Black, "root must be black");
        check_subtree(root, None, None);
    }

    #[test]
    fn new_tree_is_empty() {
        let tree = RbTree::<i32>::new();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.find(&4), None);
        assert_eq!(tree.min(), None);
        assert_eq!(tree.max(), None);
        assert!(tree.to_ordered_vec().is_empty());
    }

    #[test]
    fn single_node() {
        let mut tree = RbTree::new();
        let node = tree.insert(1024);
        assert_eq!(tree.len(), 1);

        let root = tree.root.unwrap();
        assert!(ptr::eq(root.as_ptr(), node.raw.as_ptr()));
        let root = unsafe { root.as_ref() };
        assert_eq!(root.key, 1024);
        assert_eq!(root.color, Color::Black);
        assert!(root.left.is_none());
        assert!(root.right.is_none());
        assert!(root.parent.is_none());

        assert_eq!(tree.erase(node), Ok(1024));
        assert!(tree.is_empty());
        assert!(tree.root.is_none());
    }

    #[test]
    fn find_single() {
        let mut tree = RbTree::new();
        let inserted = tree.insert(512);

        let found = tree.find(&512).unwrap();
        assert_eq!(found, inserted);
        assert_eq!(tree.key_of(found), &512);

        assert_eq!(tree.find(&1024), None);
    }

    #[test]
    fn insert_keeps_invariants() {
        let mut tree = RbTree::new();
        for key in [10, 5, 8, 34, 67, 23, 156, 24, 2, 12] {
            let node = tree.insert(key);
            assert_eq!(tree.key_of(node), &key);
            assert_red_blackness(&tree);
        }
        assert_eq!(tree.len(), 10);
    }

    #[test]
    fn ordered_enumeration() {
        let mut tree = RbTree::new();
        for key in [10, 5, 8, 34, 67, 23, 156, 24, 2, 12] {
            tree.insert(key);
        }

        assert_eq!(
            tree.to_ordered_vec(),
            &[2, 5, 8, 10, 12, 23, 24, 34, 67, 156]
        );

        let mut keys = Vec::with_capacity(tree.len());
        tree.inorder_for_each(|k| keys.push(*k));
        assert_eq!(keys, tree.to_ordered_vec());
    }

    #[test]
    fn min_max_and_erase_ends() {
        let mut tree = RbTree::new();
        for key in [10, 5, 8, 34, 67, 23, 156, 24, 2, 12] {
            tree.insert(key);
        }

        let min = tree.min().unwrap();
        assert_eq!(tree.key_of(min), &2);
        let max = tree.max().unwrap();
        assert_eq!(tree.key_of(max), &156);

        assert_eq!(tree.erase(min), Ok(2));
        assert_red_blackness(&tree);
        assert_eq!(tree.key_of(tree.min().unwrap()), &5);

        assert_eq!(tree.erase(max), Ok(156));
        assert_red_blackness(&tree);
        assert_eq!(tree.key_of(tree.max().unwrap()), &67);
    }

    #[test]
    fn duplicates() {
        let mut tree = RbTree::new();
        for key in [10, 5, 5, 34, 6, 23, 12, 12, 6, 12] {
            tree.insert(key);
            assert_red_blackness(&tree);
        }

        assert_eq!(tree.len(), 10);
        assert_eq!(tree.to_ordered_vec(), &[5, 5, 6, 6, 10, 12, 12, 12, 23, 34]);

        // each duplicate is a separate node, erase them one by one
        for remaining in (0..3).rev() {
            let node = tree.find(&12).unwrap();
            assert_eq!(tree.erase(node), Ok(12));
            assert_red_blackness(&tree);
            assert_eq!(
                tree.to_ordered_vec().iter().filter(|k| **k == 12).count(),
                remaining
            );
        }
        assert_eq!(tree.find(&12), None);
    }

    #[test]
    fn erase_then_absent() {
        let mut tree = RbTree::new();
        for key in [12, 5, 9, 2, 18, 15, 13, 17, 19] {
            tree.insert(key);
        }

        for key in [2, 5, 9, 18, 12, 15, 13, 17, 19] {
            let len_before = tree.len();
            let node = tree.find(&key).unwrap();
            assert_eq!(tree.erase(node), Ok(key));
            assert_eq!(tree.len(), len_before - 1);
            assert_eq!(tree.find(&key), None);
            assert_red_blackness(&tree);
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn erase_key_by_value() {
        let mut tree = RbTree::new();
        for key in [26, 81, 303, 0] {
            tree.insert(key);
        }

        assert_eq!(tree.erase_key(&81), Some(81));
        assert_eq!(tree.erase_key(&81), None);
        assert_eq!(tree.to_ordered_vec(), &[0, 26, 303]);
        assert_red_blackness(&tree);
    }

    #[test]
    fn erase_foreign_node() {
        let mut tree = RbTree::new();
        for key in [3836, 3865, 4173, 1635, 4585] {
            tree.insert(key);
        }

        let mut other = RbTree::new();
        let foreign = other.insert(3836);

        assert_eq!(tree.erase(foreign), Err(TreeError::ForeignNode));
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.to_ordered_vec(), &[1635, 3836, 3865, 4173, 4585]);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn contains() {
        let mut tree = RbTree::new();
        for key in [10, 5, 8, 34] {
            tree.insert(key);
        }

        assert!(tree.contains(&8));
        assert!(!tree.contains(&9));
    }

    #[test]
    fn mixed_ops_stress() {
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut tree = RbTree::new();
        let mut reference: Vec<i32> = Vec::new();

        for _ in 0..500 {
            // biased towards inserts so the tree grows
            if reference.is_empty() || rng.gen_bool(0.6) {
                let key = rng.gen_range(0..1000);
                tree.insert(key);
                reference.push(key);
            } else {
                let i = rng.gen_range(0..reference.len());
                let key = reference.swap_remove(i);
                let node = tree.find(&key).unwrap();
                assert_eq!(tree.erase(node), Ok(key));
            }
            assert_red_blackness(&tree);
        }

        reference.sort();
        assert_eq!(tree.to_ordered_vec(), reference);

        // drain in random order
        reference.shuffle(&mut rng);
        for key in reference {
            assert_eq!(tree.erase_key(&key), Some(key));
            assert_red_blackness(&tree);
        }
        assert!(tree.is_empty());
    }

    mod proptests {
        use proptest::prelude::*;
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        use super::*;

        #[cfg(not(miri))]
        const TREE_SIZE: usize = 1000;
        #[cfg(miri)]
        const TREE_SIZE: usize = 50;

        #[cfg(not(miri))]
        const PROPTEST_CASES: u32 = 1000;
        #[cfg(miri)]
        const PROPTEST_CASES: u32 = 10;

        proptest!(
            #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

            #[test]
            fn insert_find(
                inserts in proptest::collection::vec(0..10000i32, 0..TREE_SIZE),
                access in proptest::collection::vec(0..10000i32, 0..10)
            ) {
                let mut tree = RbTree::new();
                for v in &inserts {
                    let node = tree.insert(*v);
                    prop_assert_eq!(tree.key_of(node), v);
                }
                assert_red_blackness(&tree);

                for key in inserts.iter().chain(access.iter()) {
                    match tree.find(key) {
                        Some(node) => {
                            prop_assert_eq!(tree.key_of(node), key);
                            prop_assert!(inserts.contains(key));
                        }
                        None => prop_assert!(!inserts.contains(key)),
                    }
                }
            }

            #[test]
            fn order(
                inserts in proptest::collection::vec(0..10000i32, 0..TREE_SIZE),
            ) {
                let mut tree = RbTree::new();
                for v in &inserts {
                    tree.insert(*v);
                }

                // duplicates stay in the multiset
                let mut inserts = inserts;
                inserts.sort();
                prop_assert_eq!(tree.to_ordered_vec(), inserts);
            }

            #[test]
            fn min_max(
                inserts in proptest::collection::vec(0..10000i32, 1..TREE_SIZE),
            ) {
                let mut tree = RbTree::new();
                for v in &inserts {
                    tree.insert(*v);
                }

                let mut sorted = inserts;
                sorted.sort();
                prop_assert_eq!(tree.key_of(tree.min().unwrap()), sorted.first().unwrap());
                prop_assert_eq!(tree.key_of(tree.max().unwrap()), sorted.last().unwrap());

                tree.erase(tree.min().unwrap()).unwrap();
                if let Some(max) = tree.max() {
                    tree.erase(max).unwrap();
                }
                match sorted.len() {
                    1 | 2 => prop_assert!(tree.is_empty()),
                    n => {
                        prop_assert_eq!(tree.key_of(tree.min().unwrap()), &sorted[1]);
                        prop_assert_eq!(tree.key_of(tree.max().unwrap()), &sorted[n - 2]);
                    }
                }
            }

            #[test]
            fn erase_all(
                mut inserts in proptest::collection::vec(0..10000i32, 0..TREE_SIZE),
            ) {
                let mut tree = RbTree::new();
                for v in &inserts {
                    tree.insert(*v);
                }

                inserts.shuffle(&mut thread_rng());
                for key in &inserts {
                    let node = tree.find(key).unwrap();
                    prop_assert_eq!(tree.erase(node), Ok(*key));
                    assert_red_blackness(&tree);
                }
                prop_assert!(tree.is_empty());
            }
        );
    }
}
