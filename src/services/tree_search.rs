//! 树控件搜索
//!
//! 纯遍历算法与远程取数分离：[`TreeNav`] 只描述"按需取节点"的能力，
//! [`find_first`] 按先序、最左优先的顺序查找第一个匹配节点。

use crate::infrastructure::{GuiFault, GuiSession};

/// 按需获取树节点的能力
pub trait TreeNav {
    type Key: Clone;
    type Error;

    fn top(&mut self) -> Result<Option<Self::Key>, Self::Error>;
    fn text(&mut self, key: &Self::Key) -> Result<String, Self::Error>;
    fn first_child(&mut self, key: &Self::Key) -> Result<Option<Self::Key>, Self::Error>;
    fn next_sibling(&mut self, key: &Self::Key) -> Result<Option<Self::Key>, Self::Error>;
}

/// 先序遍历查找第一个文本满足 `matches` 的节点
///
/// 当前节点 → 第一个子节点及其整棵子树 → 下一个兄弟节点。
/// 兄弟节点只在子树遍历完之后才会被取出。
pub fn find_first<N, F>(nav: &mut N, matches: F) -> Result<Option<N::Key>, N::Error>
where
    N: TreeNav,
    F: Fn(&str) -> bool,
{
    let mut current = nav.top()?;
    // 已访问、但兄弟节点尚未展开的祖先链
    let mut pending: Vec<N::Key> = Vec::new();

    loop {
        match current {
            Some(node) => {
                if matches(&nav.text(&node)?) {
                    return Ok(Some(node));
                }
                current = nav.first_child(&node)?;
                pending.push(node);
            }
            None => match pending.pop() {
                Some(visited) => current = nav.next_sibling(&visited)?,
                None => return Ok(None),
            },
        }
    }
}

/// 远程树控件上的 [`TreeNav`]
pub struct GuiTree<'a> {
    gui: &'a mut dyn GuiSession,
    tree: &'a str,
}

impl<'a> GuiTree<'a> {
    pub fn new(gui: &'a mut dyn GuiSession, tree: &'a str) -> Self {
        Self { gui, tree }
    }
}

impl TreeNav for GuiTree<'_> {
    type Key = String;
    type Error = GuiFault;

    fn top(&mut self) -> Result<Option<String>, GuiFault> {
        self.gui.tree_top_node(self.tree)
    }

    fn text(&mut self, key: &String) -> Result<String, GuiFault> {
        self.gui.tree_node_text(self.tree, key)
    }

    fn first_child(&mut self, key: &String) -> Result<Option<String>, GuiFault> {
        self.gui.tree_first_child(self.tree, key)
    }

    fn next_sibling(&mut self, key: &String) -> Result<Option<String>, GuiFault> {
        self.gui.tree_next_sibling(self.tree, key)
    }
}
