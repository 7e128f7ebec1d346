//! Embedded single-page HTML frontend.
//!
//! The whole chat UI is one HTML document with inline CSS and JavaScript. It
//! drives the `/api` routes and reads streamed replies from the SSE body of
//! `POST /api/messages`.

use axum::{extract::State, response::Html};
use std::sync::Arc;

use crate::state::AppState;

const TITLE_PLACEHOLDER: &str = "{{PAGE_TITLE}}";

/// Serve the chat page
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_index(&state.config.ui.page_title))
}

pub fn render_index(page_title: &str) -> String {
    INDEX_HTML.replace(TITLE_PLACEHOLDER, &escape_html(page_title))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{PAGE_TITLE}}</title>
<link rel="icon" href="data:image/svg+xml,<svg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 100 100'><text y='.9em' font-size='90'>🤖</text></svg>">
<style>
*,*::before,*::after{box-sizing:border-box;margin:0;padding:0}
:root{
  --bg:#ffffff;
  --bg-sidebar:#f0f2f6;
  --text:#262730;
  --text-muted:#6b6f7b;
  --accent:#ff4b4b;
  --border:#dcdfe6;
  --success-bg:#e8f5e9;
  --success:#1b7f3b;
  --info-bg:#e8f0fe;
  --info:#1a56db;
  --code-bg:#f6f8fa;
}
html,body{height:100%;font-family:-apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,Helvetica,Arial,sans-serif;background:var(--bg);color:var(--text)}
body{display:flex}
code{font-family:"SF Mono",Monaco,Consolas,monospace;background:var(--code-bg);padding:1px 5px;border-radius:4px;font-size:13px}

/* Sidebar */
.sidebar{width:300px;flex-shrink:0;background:var(--bg-sidebar);padding:20px 16px;overflow-y:auto;display:flex;flex-direction:column;gap:14px}
.sidebar h2{font-size:20px}
.sidebar h3{font-size:15px;margin-bottom:6px}
.sidebar .thread-id{font-size:12px;word-break:break-all}
.sidebar hr{border:none;border-top:1px solid var(--border)}
.btn{display:block;width:100%;padding:8px 12px;border:1px solid var(--border);border-radius:8px;background:#fff;color:var(--text);font-size:14px;cursor:pointer;text-align:left}
.btn:hover{border-color:var(--accent);color:var(--accent)}
.btn.primary{text-align:center}
.btn.active{border-color:var(--accent)}
.threads{display:flex;flex-direction:column;gap:6px}
.notice{padding:10px 12px;border-radius:8px;font-size:13px;line-height:1.5;white-space:pre-line}
.notice.success{background:var(--success-bg);color:var(--success)}
.notice.info{background:var(--info-bg);color:var(--info)}
.notice.error{background:#fdecea;color:#b42318}
input[type=file]{font-size:13px;width:100%}

/* Chat */
.main{flex:1;display:flex;flex-direction:column;min-width:0}
.main h1{padding:24px 32px 8px;font-size:28px}
.messages{flex:1;overflow-y:auto;padding:8px 32px;display:flex;flex-direction:column;gap:12px}
.message{display:flex;gap:12px;max-width:820px;width:100%;margin:0 auto}
.avatar{width:32px;height:32px;border-radius:8px;display:flex;align-items:center;justify-content:center;flex-shrink:0;background:var(--bg-sidebar)}
.bubble{flex:1;line-height:1.6;font-size:15px;white-space:pre-wrap;word-wrap:break-word;padding-top:4px}
.status{max-width:820px;width:100%;margin:0 auto 6px;padding:8px 12px;border:1px solid var(--border);border-radius:8px;font-size:13px;color:var(--text-muted)}
.status.complete{color:var(--success);border-color:var(--success)}
.input-area{padding:16px 32px;border-top:1px solid var(--border)}
.input-area form{max-width:820px;margin:0 auto;display:flex;gap:10px}
.input-area textarea{flex:1;resize:none;padding:12px 14px;border-radius:10px;border:1px solid var(--border);font-size:15px;font-family:inherit;min-height:48px;outline:none}
.input-area textarea:focus{border-color:var(--accent)}
.input-area button{padding:0 18px;border:none;border-radius:10px;background:var(--accent);color:#fff;font-size:15px;cursor:pointer}
.input-area button:disabled{opacity:.5;cursor:default}
</style>
</head>
<body>
<aside class="sidebar">
  <h2>🤖 LangGraph Chatbot</h2>
  <div>
    <h3>🧵 Active Chat</h3>
    <div class="thread-id">Thread ID: <code id="thread-id"></code></div>
  </div>
  <button class="btn primary" id="new-chat">➕ New Chat</button>
  <hr>
  <div>
    <h3>📄 Document Context</h3>
    <input type="file" id="pdf-upload" accept=".pdf,application/pdf">
  </div>
  <div id="upload-status"></div>
  <div id="document" class="notice info">No document uploaded for this chat.</div>
  <hr>
  <div>
    <h3>🕘 Past Chats</h3>
    <div class="threads" id="threads"></div>
  </div>
</aside>
<main class="main">
  <h1>💬 {{PAGE_TITLE}}</h1>
  <div class="messages" id="messages"></div>
  <div class="input-area">
    <form id="chat-form">
      <textarea id="chat-input" rows="1" placeholder="Ask anything or query your document…"></textarea>
      <button type="submit" id="send">Send</button>
    </form>
  </div>
</main>
<script>
(function () {
  "use strict";

  const $ = (id) => document.getElementById(id);
  const messagesEl = $("messages");
  const input = $("chat-input");
  const sendBtn = $("send");
  let busy = false;

  async function api(method, path, body) {
    const opts = { method, credentials: "same-origin", headers: {} };
    if (body instanceof FormData) {
      opts.body = body;
    } else if (body !== undefined) {
      opts.headers["Content-Type"] = "application/json";
      opts.body = JSON.stringify(body);
    }
    const res = await fetch(path, opts);
    if (!res.ok) {
      let message = res.statusText;
      try { message = (await res.json()).error || message; } catch (_) {}
      throw new Error(message);
    }
    return res;
  }

  function appendMessage(role, content) {
    const row = document.createElement("div");
    row.className = "message " + role;
    const avatar = document.createElement("div");
    avatar.className = "avatar";
    avatar.textContent = role === "user" ? "🧑" : "🤖";
    const bubble = document.createElement("div");
    bubble.className = "bubble";
    bubble.textContent = content;
    row.append(avatar, bubble);
    messagesEl.appendChild(row);
    messagesEl.scrollTop = messagesEl.scrollHeight;
    return bubble;
  }

  function renderDocument(doc) {
    const el = $("document");
    if (doc) {
      el.className = "notice success";
      el.textContent = "📘 Using: " + doc.filename + "\n📄 Pages: " + doc.documents + "\n🧩 Chunks: " + doc.chunks;
    } else {
      el.className = "notice info";
      el.textContent = "No document uploaded for this chat.";
    }
  }

  function render(view) {
    $("thread-id").textContent = view.thread_id;
    messagesEl.innerHTML = "";
    view.messages.forEach((m) => appendMessage(m.role, m.content));
    renderDocument(view.document);
    renderThreads(view.threads);
  }

  function renderThreads(list) {
    const threads = $("threads");
    threads.innerHTML = "";
    list.forEach((t) => {
      const btn = document.createElement("button");
      btn.className = "btn" + (t.active ? " active" : "");
      btn.textContent = t.label;
      btn.title = t.thread_id;
      btn.addEventListener("click", () => activate(t.thread_id));
      threads.appendChild(btn);
    });
  }

  function setStatus(kind, text) {
    const el = $("upload-status");
    el.className = kind ? "notice " + kind : "";
    el.textContent = text || "";
  }

  async function refresh() {
    render(await (await api("GET", "/api/session")).json());
  }

  async function activate(threadId) {
    if (busy) return;
    setStatus();
    render(await (await api("POST", "/api/threads/" + encodeURIComponent(threadId) + "/activate")).json());
  }

  $("new-chat").addEventListener("click", async () => {
    if (busy) return;
    setStatus();
    $("pdf-upload").value = "";
    render(await (await api("POST", "/api/threads")).json());
  });

  $("pdf-upload").addEventListener("change", async (e) => {
    const file = e.target.files[0];
    if (!file) return;
    const form = new FormData();
    form.append("file", file, file.name);
    setStatus("info", "Indexing document…");
    try {
      const body = await (await api("POST", "/api/documents", form)).json();
      if (body.status === "already_indexed") {
        setStatus("info", "This PDF is already indexed.");
      } else {
        setStatus("success", "PDF indexed successfully!");
      }
      render(body.session);
    } catch (err) {
      setStatus("error", "Indexing failed: " + err.message);
    }
  });

  // Parse one SSE block ("event: x\ndata: {...}") into [name, payload]
  function parseBlock(block) {
    let name = "message";
    const data = [];
    block.split("\n").forEach((line) => {
      if (line.startsWith("event:")) name = line.slice(6).trim();
      else if (line.startsWith("data:")) data.push(line.slice(5).replace(/^ /, ""));
    });
    if (!data.length) return null;
    try { return [name, JSON.parse(data.join("\n"))]; } catch (_) { return null; }
  }

  async function send(content) {
    busy = true;
    sendBtn.disabled = true;
    appendMessage("user", content);

    let statusEl = null;
    const bubble = appendMessage("assistant", "");

    try {
      const res = await api("POST", "/api/messages", { content });
      const reader = res.body.getReader();
      const decoder = new TextDecoder();
      let buffer = "";

      for (;;) {
        const { value, done } = await reader.read();
        if (done) break;
        buffer += decoder.decode(value, { stream: true }).replace(/\r\n/g, "\n");

        let sep;
        while ((sep = buffer.indexOf("\n\n")) !== -1) {
          const parsed = parseBlock(buffer.slice(0, sep));
          buffer = buffer.slice(sep + 2);
          if (!parsed) continue;
          const [name, payload] = parsed;

          if (name === "token") {
            bubble.textContent += payload.content;
            messagesEl.scrollTop = messagesEl.scrollHeight;
          } else if (name === "tool" && !statusEl) {
            statusEl = document.createElement("div");
            statusEl.className = "status";
            statusEl.textContent = "🔧 " + payload.label;
            messagesEl.insertBefore(statusEl, bubble.parentElement);
          } else if (name === "tool_complete" && statusEl) {
            statusEl.className = "status complete";
            statusEl.textContent = "✅ " + payload.label;
          } else if (name === "done") {
            bubble.textContent = payload.content;
          } else if (name === "error") {
            bubble.textContent += "\n⚠️ " + payload.error;
          }
        }
      }
    } catch (err) {
      bubble.textContent = "⚠️ " + err.message;
    } finally {
      busy = false;
      sendBtn.disabled = false;
      input.focus();
      // The thread joins "Past Chats" with its first message
      api("GET", "/api/session")
        .then((res) => res.json())
        .then((view) => renderThreads(view.threads))
        .catch(() => {});
    }
  }

  $("chat-form").addEventListener("submit", (e) => {
    e.preventDefault();
    const content = input.value.trim();
    if (!content || busy) return;
    input.value = "";
    send(content);
  });

  input.addEventListener("keydown", (e) => {
    if (e.key === "Enter" && !e.shiftKey) {
      e.preventDefault();
      $("chat-form").requestSubmit();
    }
  });

  refresh().catch((err) => setStatus("error", "Backend unavailable: " + err.message));
})();
</script>
</body>
</html>
"##;
