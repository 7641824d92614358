//! 远程桥接后端 - 基础设施层
//!
//! 通过 TCP 与桌面端的脚本桥接进程通信，一行一个 JSON：
//!
//! ```text
//! -> {"op":"set_text","control":"VBAK-VBELN","value":"5012233445"}
//! <- {"ok":true,"value":null}
//! <- {"ok":false,"kind":"control_not_found","message":"VBAK-VBELN"}
//! ```
//!
//! 桥接进程负责真正驱动远程 GUI 客户端，这里只做请求编码和错误映射。

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::gui::{GuiFault, GuiResult, GuiSession, MessageType, StatusBar, VKey, WindowInfo};
use super::session::{ConnectionError, Connector, SessionHandle};

/// 桥接请求
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Open { system: &'a str },
    Ping,
    Disconnect,
    StartTransaction { code: &'a str },
    EndTransaction,
    SendVkey { key: u8 },
    SetText { control: &'a str, value: &'a str },
    Text { control: &'a str },
    SetFocus { control: &'a str },
    Press { control: &'a str },
    ControlCount { control: &'a str },
    SelectTab { strip: &'a str, index: usize },
    StatusBar,
    ActiveWindow,
    DialogLines,
    DialogButtons,
    PressDialogButton { caption: &'a str },
    TreeTopNode { tree: &'a str },
    TreeNodeText { tree: &'a str, key: &'a str },
    TreeFirstChild { tree: &'a str, key: &'a str },
    TreeNextSibling { tree: &'a str, key: &'a str },
    TreeOpenNode { tree: &'a str, key: &'a str },
    GridCell { grid: &'a str, row: usize, column: &'a str },
    TableRowCount { table: &'a str },
    TableVisibleRows { table: &'a str },
    TableCell { table: &'a str, row: usize, column: usize },
    TableScrollTo { table: &'a str, position: usize },
    TableSelectRow { table: &'a str, row: usize },
}

/// 桥接响应
#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Reply {
    fn into_result(self) -> GuiResult<Value> {
        if self.ok {
            return Ok(self.value);
        }
        let message = self.message.unwrap_or_default();
        Err(match self.kind.as_deref() {
            Some("control_not_found") => GuiFault::ControlNotFound(message),
            Some("rejected") => GuiFault::Rejected {
                control: String::new(),
                message,
            },
            Some("transport") => GuiFault::Transport(message),
            _ => GuiFault::Remote(message),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StatusBarValue {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct WindowValue {
    #[serde(default)]
    modal: bool,
    #[serde(default)]
    title: String,
}

/// 桥接会话
pub struct BridgeSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl BridgeSession {
    fn connect(addr: &str, timeout: Duration) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// 发送一个请求并读取一行响应
    fn call(&mut self, request: &Request<'_>) -> GuiResult<Value> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| GuiFault::Remote(format!("encode request: {e}")))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| GuiFault::Transport(e.to_string()))?;

        let mut response = String::new();
        let read = self
            .reader
            .read_line(&mut response)
            .map_err(|e| GuiFault::Transport(e.to_string()))?;
        if read == 0 {
            return Err(GuiFault::Transport("bridge closed the connection".to_string()));
        }

        let reply: Reply = serde_json::from_str(response.trim())
            .map_err(|e| GuiFault::Remote(format!("malformed reply: {e}")))?;
        reply.into_result()
    }

    fn call_unit(&mut self, request: &Request<'_>) -> GuiResult<()> {
        self.call(request).map(|_| ())
    }

    fn call_string(&mut self, request: &Request<'_>) -> GuiResult<String> {
        match self.call(request)? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    fn call_usize(&mut self, request: &Request<'_>) -> GuiResult<usize> {
        let value = self.call(request)?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| GuiFault::Remote(format!("expected a number, got {value}")))
    }

    fn call_optional(&mut self, request: &Request<'_>) -> GuiResult<Option<String>> {
        match self.call(request)? {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    fn call_lines(&mut self, request: &Request<'_>) -> GuiResult<Vec<String>> {
        let value = self.call(request)?;
        serde_json::from_value(value).map_err(|e| GuiFault::Remote(format!("malformed list: {e}")))
    }
}

impl GuiSession for BridgeSession {
    fn start_transaction(&mut self, code: &str) -> GuiResult<()> {
        self.call_unit(&Request::StartTransaction { code })
    }

    fn end_transaction(&mut self) -> GuiResult<()> {
        self.call_unit(&Request::EndTransaction)
    }

    fn send_vkey(&mut self, key: VKey) -> GuiResult<()> {
        self.call_unit(&Request::SendVkey { key: key.code() })
    }

    fn set_text(&mut self, control: &str, value: &str) -> GuiResult<()> {
        self.call_unit(&Request::SetText { control, value })
            .map_err(|fault| match fault {
                GuiFault::Rejected { message, .. } => GuiFault::Rejected {
                    control: control.to_string(),
                    message,
                },
                other => other,
            })
    }

    fn text(&mut self, control: &str) -> GuiResult<String> {
        self.call_string(&Request::Text { control })
    }

    fn set_focus(&mut self, control: &str) -> GuiResult<()> {
        self.call_unit(&Request::SetFocus { control })
    }

    fn press(&mut self, control: &str) -> GuiResult<()> {
        self.call_unit(&Request::Press { control })
    }

    fn control_count(&mut self, control: &str) -> GuiResult<usize> {
        self.call_usize(&Request::ControlCount { control })
    }

    fn select_tab(&mut self, strip: &str, index: usize) -> GuiResult<()> {
        self.call_unit(&Request::SelectTab { strip, index })
    }

    fn status_bar(&mut self) -> GuiResult<StatusBar> {
        let value = self.call(&Request::StatusBar)?;
        let bar: StatusBarValue = serde_json::from_value(value)
            .map_err(|e| GuiFault::Remote(format!("malformed status bar: {e}")))?;
        Ok(StatusBar::new(bar.text, MessageType::from_code(&bar.kind)))
    }

    fn active_window(&mut self) -> GuiResult<WindowInfo> {
        let value = self.call(&Request::ActiveWindow)?;
        let window: WindowValue = serde_json::from_value(value)
            .map_err(|e| GuiFault::Remote(format!("malformed window: {e}")))?;
        Ok(if window.modal {
            WindowInfo::modal(window.title)
        } else {
            WindowInfo::main(window.title)
        })
    }

    fn dialog_lines(&mut self) -> GuiResult<Vec<String>> {
        self.call_lines(&Request::DialogLines)
    }

    fn dialog_buttons(&mut self) -> GuiResult<Vec<String>> {
        self.call_lines(&Request::DialogButtons)
    }

    fn press_dialog_button(&mut self, caption: &str) -> GuiResult<()> {
        self.call_unit(&Request::PressDialogButton { caption })
    }

    fn tree_top_node(&mut self, tree: &str) -> GuiResult<Option<String>> {
        self.call_optional(&Request::TreeTopNode { tree })
    }

    fn tree_node_text(&mut self, tree: &str, key: &str) -> GuiResult<String> {
        self.call_string(&Request::TreeNodeText { tree, key })
    }

    fn tree_first_child(&mut self, tree: &str, key: &str) -> GuiResult<Option<String>> {
        self.call_optional(&Request::TreeFirstChild { tree, key })
    }

    fn tree_next_sibling(&mut self, tree: &str, key: &str) -> GuiResult<Option<String>> {
        self.call_optional(&Request::TreeNextSibling { tree, key })
    }

    fn tree_open_node(&mut self, tree: &str, key: &str) -> GuiResult<()> {
        self.call_unit(&Request::TreeOpenNode { tree, key })
    }

    fn grid_cell(&mut self, grid: &str, row: usize, column: &str) -> GuiResult<String> {
        self.call_string(&Request::GridCell { grid, row, column })
    }

    fn table_row_count(&mut self, table: &str) -> GuiResult<usize> {
        self.call_usize(&Request::TableRowCount { table })
    }

    fn table_visible_rows(&mut self, table: &str) -> GuiResult<usize> {
        self.call_usize(&Request::TableVisibleRows { table })
    }

    fn table_cell(&mut self, table: &str, visible_row: usize, column: usize) -> GuiResult<String> {
        self.call_string(&Request::TableCell {
            table,
            row: visible_row,
            column,
        })
    }

    fn table_scroll_to(&mut self, table: &str, position: usize) -> GuiResult<()> {
        self.call_unit(&Request::TableScrollTo { table, position })
    }

    fn table_select_row(&mut self, table: &str, absolute_row: usize) -> GuiResult<()> {
        self.call_unit(&Request::TableSelectRow {
            table,
            row: absolute_row,
        })
    }

    fn is_alive(&mut self) -> bool {
        match self.call(&Request::Ping) {
            Ok(_) => true,
            Err(e) => {
                debug!("存活探测失败: {}", e);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.call_unit(&Request::Disconnect) {
            debug!("断开桥接会话时出错（忽略）: {}", e);
        }
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }
}

/// 桥接会话工厂
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    addr: String,
    timeout: Duration,
}

impl BridgeConnector {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl Connector for BridgeConnector {
    fn open(&mut self, system: &str) -> Result<SessionHandle, ConnectionError> {
        let mut session =
            BridgeSession::connect(&self.addr, self.timeout).map_err(|e| {
                ConnectionError::Unreachable {
                    system: system.to_string(),
                    reason: format!("{}: {}", self.addr, e),
                }
            })?;

        match session.call_unit(&Request::Open { system }) {
            Ok(()) => Ok(SessionHandle::new(system, Box::new(session))),
            Err(GuiFault::Transport(reason)) => Err(ConnectionError::Unreachable {
                system: system.to_string(),
                reason,
            }),
            Err(fault) => {
                warn!("桥接进程拒绝打开会话: {}", fault);
                Err(ConnectionError::Rejected {
                    system: system.to_string(),
                    reason: fault.to_string(),
                })
            }
        }
    }
}
